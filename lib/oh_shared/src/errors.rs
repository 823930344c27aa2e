// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use std::fmt;

/// Every error name the database reports, as a matchable kind. Names the
/// client does not recognize map to Unknown rather than failing, so an older
/// client keeps working against a newer database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatabaseErrorKind {
    // Path format errors.
    Dotfile,
    EmptyComponent,
    InvalidCharacter,
    InvalidWhitespace,
    NonAbsolutePath,

    // Tree errors.
    DirectoryNotEmpty,
    NoSuchNode,
    NodeAlreadyExists,
    NodeContainsSubscriptions,
    NotDirectory,
    NotFile,

    // Formula errors.
    FormulaCycle,
    FormulaInputNotFound,
    FormulaParseError,
    FormulaTypeError,

    // Subscription errors.
    NoSuchSubscription,

    // Protocol errors.
    IdOutOfRange,
    MissingField,
    UnknownMessageType,
    UnknownNodeType,
    WrongFieldType,

    Unknown,
}

/// An in-band error response from the database. The kind is stable protocol;
/// the context is for human diagnostics only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
    name: String,
    context: String,
}

impl DatabaseError {
    pub fn from_wire(name: &str, context: &str) -> DatabaseError {
        let kind = match name {
            "Dotfile" => DatabaseErrorKind::Dotfile,
            "EmptyComponent" => DatabaseErrorKind::EmptyComponent,
            "InvalidCharacter" => DatabaseErrorKind::InvalidCharacter,
            "InvalidWhitespace" => DatabaseErrorKind::InvalidWhitespace,
            "NonAbsolutePath" => DatabaseErrorKind::NonAbsolutePath,
            "DirectoryNotEmpty" => DatabaseErrorKind::DirectoryNotEmpty,
            "NoSuchNode" => DatabaseErrorKind::NoSuchNode,
            "NodeAlreadyExists" => DatabaseErrorKind::NodeAlreadyExists,
            "NodeContainsSubscriptions" => DatabaseErrorKind::NodeContainsSubscriptions,
            "NotDirectory" => DatabaseErrorKind::NotDirectory,
            "NotFile" => DatabaseErrorKind::NotFile,
            "FormulaCycle" => DatabaseErrorKind::FormulaCycle,
            "FormulaInputNotFound" => DatabaseErrorKind::FormulaInputNotFound,
            "FormulaParseError" => DatabaseErrorKind::FormulaParseError,
            "FormulaTypeError" => DatabaseErrorKind::FormulaTypeError,
            "NoSuchSubscription" => DatabaseErrorKind::NoSuchSubscription,
            "IdOutOfRange" => DatabaseErrorKind::IdOutOfRange,
            "MissingField" => DatabaseErrorKind::MissingField,
            "UnknownMessageType" => DatabaseErrorKind::UnknownMessageType,
            "UnknownNodeType" => DatabaseErrorKind::UnknownNodeType,
            "WrongFieldType" => DatabaseErrorKind::WrongFieldType,
            _ => DatabaseErrorKind::Unknown,
        };
        DatabaseError {
            kind,
            name: name.to_owned(),
            context: context.to_owned(),
        }
    }

    pub fn kind(&self) -> DatabaseErrorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.context)
    }
}

impl ::failure::Fail for DatabaseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names_map_to_kinds() {
        let e = DatabaseError::from_wire("NoSuchNode", "a");
        assert_eq!(e.kind(), DatabaseErrorKind::NoSuchNode);
        assert_eq!(e.name(), "NoSuchNode");
        assert_eq!(e.context(), "a");
    }

    #[test]
    fn test_unknown_names_are_preserved() {
        let e = DatabaseError::from_wire("SomethingNew", "context");
        assert_eq!(e.kind(), DatabaseErrorKind::Unknown);
        assert_eq!(e.name(), "SomethingNew");
    }
}
