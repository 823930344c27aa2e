// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.

// Produce an error enum whose variant names double as the error names that
// cross the wire, each carrying a context string for human diagnostics.
#[macro_export]
macro_rules! make_error {
    ($type:ident; { $( $name:ident => $ctx:ty ),+ $(,)? }) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub enum $type {
            $( $name($ctx) ),+
        }
        impl $type {
            /// The stable name reported on the wire.
            pub fn name(&self) -> &'static str {
                match self {
                    $( $type::$name(_) => stringify!($name) ),+
                }
            }
            pub fn context(&self) -> &str {
                match self {
                    $( $type::$name(ref context) => context ),+
                }
            }
        }
        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}: {}", self.name(), self.context())
            }
        }
        impl ::failure::Fail for $type {}
    };
}
