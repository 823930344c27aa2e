// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::tree::{TreeError, TreeResult};
use globset::{GlobBuilder, GlobMatcher};
use std::fmt;

/// OpenHouse paths have somewhat stricter rules than a typical filesystem.
/// The rules are:
///   * must be unix style
///   * must be absolute
///   * path components may not start with '.'
///   * path components must not be empty, e.g. //
///   * must only contain printable UTF-8 characters
///   * the following characters are disallowed:
///     - any whitespace character other than 0x20 (plain ol' space)
///     - any characters special to yaml:
///       \ : ,
///     - any globbing characters:
///       ? * { } [ ] !
///
/// Globs are just like paths, except that they relax the glob character
/// check: ? and * wildcards, ** components, and {a,b} alternations are
/// allowed, with ',' legal only inside a brace group. The characters
/// [ ] ! are rejected everywhere. Both paths and globs are constructed
/// through a PathBuilder.
pub struct PathBuilder {
    raw: String,
    parts: Vec<String>,
    contains_glob_chars: bool,
}

impl PathBuilder {
    /// Parse the given raw UTF-8 string. This function returns an error if
    /// the string cannot be either a path or a glob.
    pub fn new(raw: &str) -> TreeResult<PathBuilder> {
        if !raw.starts_with('/') {
            return Err(TreeError::NonAbsolutePath(raw.to_owned()));
        }

        // Split produces two empty strings for "/", so just handle it
        // separately instead of trying to do something smart in the loop.
        if raw == "/" {
            return Ok(PathBuilder {
                raw: raw.to_owned(),
                parts: Vec::new(),
                contains_glob_chars: false,
            });
        }

        // Note that since we start with /, we have to skip the first, empty, part.
        let mut contains_glob_chars = false;
        let mut parts = Vec::new();
        for (i, part) in raw.split('/').skip(1).enumerate() {
            if validate_component(raw, i, part, true)? {
                contains_glob_chars = true;
            }
            parts.push(part.to_owned());
        }
        Ok(PathBuilder {
            raw: raw.to_owned(),
            parts,
            contains_glob_chars,
        })
    }

    /// Return the given path, if it is a path and not a glob. Otherwise
    /// returns an error.
    pub fn finish_path(self) -> TreeResult<Path> {
        if self.contains_glob_chars {
            return Err(TreeError::InvalidCharacter(format!(
                "unexpected glob character in {}",
                self.raw
            )));
        }
        Ok(Path { parts: self.parts })
    }

    /// Compile the given pattern into a glob. A concrete path is a valid
    /// glob that matches only itself.
    pub fn finish_glob(self) -> TreeResult<Glob> {
        let exact = if self.contains_glob_chars {
            None
        } else {
            Some(Path {
                parts: self.parts.clone(),
            })
        };
        let matcher = GlobBuilder::new(&self.raw)
            .literal_separator(true)
            .build()
            .map_err(|e| TreeError::InvalidCharacter(format!("{}: {}", self.raw, e)))?
            .compile_matcher();
        Ok(Glob {
            raw: self.raw,
            matcher,
            exact,
        })
    }

    /// Verify that a bare name obeys the rules for a single path component.
    pub fn validate_path_component(name: &str) -> TreeResult<()> {
        validate_component(name, 0, name, false)?;
        Ok(())
    }
}

// Returns whether the component uses glob syntax, or an error if it is not
// valid under the given mode.
fn validate_component(raw: &str, index: usize, part: &str, allow_glob: bool) -> TreeResult<bool> {
    if part.is_empty() {
        return Err(TreeError::EmptyComponent(format!(
            "{} at part {}",
            raw, index
        )));
    }
    if part.starts_with('.') {
        return Err(TreeError::Dotfile(format!("{} at part {}", raw, index)));
    }

    let mut contains_glob_chars = false;
    let mut brace_depth = 0;
    for c in part.chars() {
        match c {
            '\\' | '/' | ':' | '[' | ']' | '!' => {
                return Err(TreeError::InvalidCharacter(format!(
                    "{} character: {}",
                    raw, c
                )));
            }
            '?' | '*' if allow_glob => contains_glob_chars = true,
            '{' if allow_glob => {
                brace_depth += 1;
                if brace_depth > 1 {
                    return Err(TreeError::InvalidCharacter(format!(
                        "{}: nested brace group",
                        raw
                    )));
                }
                contains_glob_chars = true;
            }
            '}' if allow_glob => {
                if brace_depth == 0 {
                    return Err(TreeError::InvalidCharacter(format!(
                        "{}: unbalanced brace group",
                        raw
                    )));
                }
                brace_depth -= 1;
            }
            ',' if allow_glob && brace_depth > 0 => {}
            '?' | '*' | '{' | '}' | ',' => {
                return Err(TreeError::InvalidCharacter(format!(
                    "{} character: {}",
                    raw, c
                )));
            }
            c if c.is_whitespace() && c != ' ' => {
                return Err(TreeError::InvalidWhitespace(format!(
                    "{} at 0x{:X}",
                    raw, c as u32
                )));
            }
            _ => {}
        }
    }
    if brace_depth != 0 {
        return Err(TreeError::InvalidCharacter(format!(
            "{}: unbalanced brace group",
            raw
        )));
    }
    Ok(contains_glob_chars)
}

/// A path refers to a single location in the Tree. The location may or may
/// not exist; a path is just a reference to a location.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Path {
    parts: Vec<String>,
}

impl Path {
    pub fn root() -> Path {
        Path { parts: Vec::new() }
    }

    // Build a new String containing the canonical representation of this path.
    pub fn to_str(&self) -> String {
        "/".to_owned() + &self.parts.join("/")
    }

    pub fn iter(&self) -> PathIter {
        PathIter {
            parts: &self.parts,
            offset: 0,
        }
    }

    /// The location one level up, or None at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.parts.is_empty() {
            return None;
        }
        Some(Path {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    pub fn basename(&self) -> Option<&str> {
        self.parts.last().map(|name| name.as_str())
    }

    /// The location of the given child under this path.
    pub fn slash(&self, name: &str) -> TreeResult<Path> {
        PathBuilder::validate_path_component(name)?;
        Ok(self.new_child(name))
    }

    // As with slash, for names already living in the tree.
    pub(crate) fn new_child(&self, name: &str) -> Path {
        let mut parts = self.parts.clone();
        parts.push(name.to_owned());
        Path { parts }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// An iteration of the components of a Path.
pub struct PathIter<'a> {
    parts: &'a [String],
    offset: usize,
}

impl<'a> Iterator for PathIter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.parts.len() {
            return None;
        }
        let off = self.offset;
        self.offset += 1;
        Some(&self.parts[off])
    }
}

/// A glob refers to zero or more locations in a Tree.
#[derive(Clone)]
pub struct Glob {
    raw: String,
    matcher: GlobMatcher,
    exact: Option<Path>,
}

impl Glob {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.matcher.is_match(path.to_str())
    }

    pub fn is_exact(&self) -> bool {
        self.exact.is_some()
    }

    /// The single path this glob names, if it contains no glob syntax.
    pub fn as_exact_path(&self) -> Option<&Path> {
        self.exact.as_ref()
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Glob({})", self.raw)
    }
}
