// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
#[macro_use]
mod utility;
mod formula;
mod graph;
mod parser;
mod path;
mod tokenizer;
mod tree;

pub use self::path::{Glob, Path, PathBuilder};
pub use self::tree::{Tree, TreeChanges, TreeError, TreeResult};
