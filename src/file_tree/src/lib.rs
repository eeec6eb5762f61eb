// The on-disk archive tree and its derived incoming/results trees.
//
// layout under top_dir:
//   archive/fs-version-001/<controller>/<name>.tar.xz(.md5)
//   archive/fs-version-001/<controller>/TODO/<name>.tar.xz -> ../<name>.tar.xz
//   public_html/incoming/<controller>/<name>/
//   public_html/results/<controller>/<name> -> incoming/<controller>/<name>

mod catalog;
mod config;
mod file_tree;
mod name_lock;
mod tarball;

pub use catalog::*;
pub use config::*;
pub use file_tree::*;
pub use tarball::*;
