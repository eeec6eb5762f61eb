use crate::tarball::{Controller, Tarball};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// In-memory view of the archive tree: controllers and the datasets they hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    controllers: BTreeMap<String, Controller>,
    datasets: BTreeMap<String, Tarball>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_controller(&mut self, name: &str, path: PathBuf) -> &mut Controller {
        self.controllers
            .entry(name.to_string())
            .or_insert_with(|| Controller::new(name, path))
    }

    /// Register a dataset, creating its controller entry if needed.
    pub fn insert(&mut self, tarball: Tarball, controller_path: PathBuf) {
        self.add_controller(&tarball.controller_name, controller_path)
            .tarballs
            .insert(tarball.name.clone());
        self.datasets.insert(tarball.name.clone(), tarball);
    }

    pub fn remove(&mut self, name: &str) -> Option<Tarball> {
        let tarball = self.datasets.remove(name)?;
        if let Some(controller) = self.controllers.get_mut(&tarball.controller_name) {
            controller.tarballs.remove(name);
        }
        Some(tarball)
    }

    pub fn remove_controller(&mut self, name: &str) -> Option<Controller> {
        self.controllers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Tarball> {
        self.datasets.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tarball> {
        self.datasets.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn controller(&self, name: &str) -> Option<&Controller> {
        self.controllers.get(name)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Tarball> {
        self.datasets.values()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty() && self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tarball(name: &str, controller: &str) -> Tarball {
        let dir = PathBuf::from("/archive").join(controller);
        Tarball {
            name: name.to_string(),
            controller_name: controller.to_string(),
            tarball_path: dir.join(format!("{}.tar.xz", name)),
            md5_path: dir.join(format!("{}.tar.xz.md5", name)),
            md5: None,
            unpacked: false,
            unpacked_path: None,
            results_link: None,
            pending: true,
        }
    }

    #[test]
    fn test_insert_remove() {
        let mut catalog = Catalog::new();
        catalog.insert(tarball("a", "ABC"), PathBuf::from("/archive/ABC"));
        catalog.insert(tarball("b", "ABC"), PathBuf::from("/archive/ABC"));
        catalog.add_controller("EMPTY", PathBuf::from("/archive/EMPTY"));

        let abc = catalog.controller("ABC").unwrap();
        assert_eq!(abc.tarballs.len(), 2);
        assert!(catalog.controller("EMPTY").unwrap().tarballs.is_empty());

        assert_eq!(catalog.remove("a").unwrap().name, "a");
        assert!(catalog.remove("a").is_none());
        assert!(!catalog.contains("a"));
        assert_eq!(catalog.controller("ABC").unwrap().tarballs.len(), 1);
        assert_eq!(catalog.datasets().count(), 1);
    }
}
