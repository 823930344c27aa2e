// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::formula::FormulaData;
use crate::graph::DependencyGraph;
use crate::path::{Glob, Path, PathBuilder};
use log::warn;
use std::collections::{HashMap, HashSet};

make_error!(TreeError; {
    DirectoryNotEmpty => String,
    NoSuchNode => String,
    NodeAlreadyExists => String,
    NotDirectory => String,
    NotFile => String,

    // Path format errors.
    NonAbsolutePath => String,
    Dotfile => String,
    EmptyComponent => String,
    InvalidCharacter => String,
    InvalidWhitespace => String,

    // Formula errors.
    FormulaCycle => String,
    FormulaInputNotFound => String,
    FormulaParseError => String,
    FormulaTypeError => String
});
pub type TreeResult<T> = Result<T, TreeError>;

/// The coalesced result of a write: each new value maps to the sorted list
/// of paths that acquired it, the written files first and every affected
/// formula after its inputs.
pub type TreeChanges = HashMap<String, Vec<Path>>;

/// Each node contains a directory of more nodes or some leaf data.
enum Node {
    Directory(DirectoryData),
    File(FileData),
    Formula(FormulaData),
}

impl Node {
    // Follow the parts of the path iterator until we reach the terminal
    // node, returning it.
    fn lookup(&self, parts: &mut crate::path::PathIter) -> TreeResult<&Node> {
        let name = match parts.next() {
            Some(name) => name,
            None => return Ok(self),
        };
        match self {
            Node::Directory(d) => d.lookup(name)?.lookup(parts),
            _ => Err(TreeError::NotDirectory(name.to_owned())),
        }
    }

    // Like lookup, but takes and returns mutable references.
    fn lookup_mut(&mut self, parts: &mut crate::path::PathIter) -> TreeResult<&mut Node> {
        let name = match parts.next() {
            Some(name) => name,
            None => return Ok(self),
        };
        match self {
            Node::Directory(d) => d.lookup_mut(name)?.lookup_mut(parts),
            _ => Err(TreeError::NotDirectory(name.to_owned())),
        }
    }

    // Return all file and formula nodes matching |glob|, given that this
    // node lives at |own_path|. Directories are traversed, never matched.
    fn find<'a>(&'a self, own_path: &Path, glob: &Glob) -> Vec<(Path, &'a Node)> {
        let mut acc: Vec<(Path, &'a Node)> = Vec::new();
        match self {
            Node::Directory(d) => {
                for (child_name, child_node) in d.children.iter() {
                    let child_path = own_path.new_child(child_name);
                    acc.extend(child_node.find(&child_path, glob));
                }
            }
            Node::File(_) | Node::Formula(_) => {
                if glob.matches(own_path) {
                    acc.push((own_path.clone(), self));
                }
            }
        }
        acc
    }

    // As with find but taking and returning mutable references.
    fn find_mut<'a>(&'a mut self, own_path: &Path, glob: &Glob) -> Vec<(Path, &'a mut Node)> {
        let mut acc: Vec<(Path, &'a mut Node)> = Vec::new();
        match self {
            Node::Directory(d) => {
                for (child_name, child_node) in d.children.iter_mut() {
                    let child_path = own_path.new_child(child_name);
                    acc.extend(child_node.find_mut(&child_path, glob));
                }
            }
            Node::File(_) | Node::Formula(_) => {
                if glob.matches(own_path) {
                    acc.push((own_path.clone(), self));
                }
            }
        }
        acc
    }
}

/// A file is a basic data holder.
struct FileData {
    data: String,
}

impl FileData {
    fn new() -> FileData {
        FileData {
            data: "".to_owned(),
        }
    }

    fn set_data(&mut self, new_data: &str) {
        self.data = new_data.to_owned();
    }

    fn get_data(&self) -> String {
        self.data.clone()
    }
}

/// A directory contains a list of children.
struct DirectoryData {
    children: HashMap<String, Node>,
}

impl DirectoryData {
    fn new() -> Self {
        DirectoryData {
            children: HashMap::new(),
        }
    }

    fn lookup(&self, name: &str) -> TreeResult<&Node> {
        self.children
            .get(name)
            .ok_or_else(|| TreeError::NoSuchNode(name.to_owned()))
    }

    fn lookup_mut(&mut self, name: &str) -> TreeResult<&mut Node> {
        self.children
            .get_mut(name)
            .ok_or_else(|| TreeError::NoSuchNode(name.to_owned()))
    }

    fn add_child(&mut self, name: &str, node: Node) -> TreeResult<()> {
        PathBuilder::validate_path_component(name)?;
        if self.children.contains_key(name) {
            return Err(TreeError::NodeAlreadyExists(name.to_owned()));
        }
        let result = self.children.insert(name.to_owned(), node);
        assert!(result.is_none());
        Ok(())
    }

    fn list_directory(&self) -> Vec<String> {
        let mut names = self
            .children
            .keys()
            .cloned()
            .collect::<Vec<String>>();
        names.sort();
        names
    }
}

/// A tree of Node. All mutation flows through the Tree so that the formula
/// dependency graph always reflects the installed formulas.
pub struct Tree {
    root: Node,
    graph: DependencyGraph,
}

impl Tree {
    /// Creates a new, empty Tree.
    pub fn new() -> Tree {
        Tree {
            root: Node::Directory(DirectoryData::new()),
            graph: DependencyGraph::new(),
        }
    }

    pub fn create_directory(&mut self, parent: &Path, name: &str) -> TreeResult<()> {
        PathBuilder::validate_path_component(name)?;
        self.lookup_directory_mut(parent)?
            .add_child(name, Node::Directory(DirectoryData::new()))?;
        Ok(())
    }

    pub fn create_file(&mut self, parent: &Path, name: &str) -> TreeResult<()> {
        PathBuilder::validate_path_component(name)?;
        let path = parent.slash(name)?;
        self.lookup_directory_mut(parent)?
            .add_child(name, Node::File(FileData::new()))?;
        self.invalidate_dependents_of(&path);
        Ok(())
    }

    /// Install a formula node. The expression is compiled and the dependency
    /// edges checked for cycles before anything is mutated, so failure leaves
    /// the tree unchanged.
    pub fn create_formula(
        &mut self,
        parent: &Path,
        name: &str,
        inputs: &[(String, Path)],
        expression: &str,
    ) -> TreeResult<()> {
        PathBuilder::validate_path_component(name)?;
        let path = parent.slash(name)?;
        let formula = FormulaData::new(inputs, expression)?;

        {
            let dir = self.lookup_directory_mut(parent)?;
            if dir.children.contains_key(name) {
                return Err(TreeError::NodeAlreadyExists(name.to_owned()));
            }
        }

        let input_paths = formula.input_paths();
        if self.graph.would_cycle(&path, &input_paths) {
            return Err(TreeError::FormulaCycle(path.to_str()));
        }

        self.lookup_directory_mut(parent)?
            .add_child(name, Node::Formula(formula))?;
        self.graph.add_formula(&path, &input_paths);
        self.invalidate_dependents_of(&path);
        Ok(())
    }

    /// Remove the named child. Directories must be empty; removing a formula
    /// unregisters its dependency edges; any formula reading the removed
    /// path goes stale.
    pub fn remove_node(&mut self, parent: &Path, name: &str) -> TreeResult<()> {
        PathBuilder::validate_path_component(name)?;
        let path = parent.slash(name)?;
        let mut removed_formula = false;
        {
            let dir = self.lookup_directory_mut(parent)?;
            match dir.lookup(name)? {
                Node::Directory(d) => {
                    if !d.children.is_empty() {
                        return Err(TreeError::DirectoryNotEmpty(name.to_owned()));
                    }
                }
                Node::Formula(_) => removed_formula = true,
                Node::File(_) => {}
            }
            let result = dir.children.remove(name);
            assert!(result.is_some());
        }
        if removed_formula {
            self.graph.remove_formula(&path);
        }
        self.invalidate_dependents_of(&path);
        Ok(())
    }

    pub fn list_directory(&self, path: &Path) -> TreeResult<Vec<String>> {
        let node = self.root.lookup(&mut path.iter())?;
        match node {
            Node::Directory(d) => Ok(d.list_directory()),
            _ => Err(TreeError::NotDirectory(path.to_str())),
        }
    }

    /// Returns the data at the given node. Reading a formula evaluates it.
    pub fn get_data_at(&self, path: &Path) -> TreeResult<String> {
        let node = self.root.lookup(&mut path.iter())?;
        match node {
            Node::File(f) => Ok(f.get_data()),
            Node::Formula(f) => f.get_data(self),
            Node::Directory(_) => Err(TreeError::NotFile(path.to_str())),
        }
    }

    /// Set the data at the given path.
    pub fn set_data_at(&mut self, path: &Path, new_data: &str) -> TreeResult<TreeChanges> {
        {
            let node = self.root.lookup_mut(&mut path.iter())?;
            match node {
                Node::File(f) => f.set_data(new_data),
                _ => return Err(TreeError::NotFile(path.to_str())),
            }
        }
        let mut written = HashSet::new();
        written.insert(path.clone());
        Ok(self.apply_data_change(written, new_data))
    }

    /// Get all file and formula nodes matching the given glob and return
    /// their data, sorted by path.
    pub fn get_data_matching(&self, glob: &Glob) -> TreeResult<Vec<(Path, String)>> {
        let mut pairs = Vec::new();
        for (path, node) in self.root.find(&Path::root(), glob) {
            match node {
                Node::File(f) => pairs.push((path, f.get_data())),
                Node::Formula(f) => pairs.push((path.clone(), f.get_data(self)?)),
                Node::Directory(_) => {}
            }
        }
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    /// Set the data at all matching paths. The write is all-or-nothing: a
    /// formula matched by the glob fails the whole request with NotFile and
    /// no file is touched.
    pub fn set_data_matching(&mut self, glob: &Glob, new_data: &str) -> TreeResult<TreeChanges> {
        if let Some(path) = glob.as_exact_path() {
            let path = path.clone();
            return self.set_data_at(&path, new_data);
        }

        let mut written = HashSet::new();
        {
            let matching = self.root.find_mut(&Path::root(), glob);
            for (path, node) in &matching {
                if let Node::Formula(_) = node {
                    return Err(TreeError::NotFile(path.to_str()));
                }
            }
            for (path, node) in matching {
                if let Node::File(f) = node {
                    f.set_data(new_data);
                    written.insert(path);
                }
            }
        }
        Ok(self.apply_data_change(written, new_data))
    }

    // Invalidate every formula downstream of the written paths, re-evaluate
    // them inputs-first, and fold the results into the coalesced change map.
    // A formula that fails to evaluate after the write is logged and left
    // out; the write itself already happened.
    fn apply_data_change(&self, written: HashSet<Path>, new_data: &str) -> TreeChanges {
        let affected = self.graph.transitive_dependents(&written);
        for path in &affected {
            if let Some(formula) = self.formula_at(path) {
                formula.invalidate();
            }
        }

        let mut written_paths = written.into_iter().collect::<Vec<Path>>();
        written_paths.sort();
        let mut changes = TreeChanges::new();
        changes.insert(new_data.to_owned(), written_paths);
        for path in affected {
            match self.get_data_at(&path) {
                Ok(value) => changes
                    .entry(value)
                    .or_insert_with(Vec::new)
                    .push(path),
                Err(e) => warn!("formula at {} failed after input change: {}", path, e),
            }
        }
        for paths in changes.values_mut() {
            paths.sort();
        }
        changes
    }

    fn invalidate_dependents_of(&self, path: &Path) {
        let mut written = HashSet::new();
        written.insert(path.clone());
        for dependent in self.graph.transitive_dependents(&written) {
            if let Some(formula) = self.formula_at(&dependent) {
                formula.invalidate();
            }
        }
    }

    fn formula_at(&self, path: &Path) -> Option<&FormulaData> {
        match self.root.lookup(&mut path.iter()) {
            Ok(Node::Formula(f)) => Some(f),
            _ => None,
        }
    }

    fn lookup_directory_mut(&mut self, path: &Path) -> TreeResult<&mut DirectoryData> {
        let node = self.root.lookup_mut(&mut path.iter())?;
        match node {
            Node::Directory(d) => Ok(d),
            _ => Err(TreeError::NotDirectory(path.to_str())),
        }
    }
}
