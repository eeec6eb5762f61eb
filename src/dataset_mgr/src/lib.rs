// Service-side boundaries of the dataset store: ingest, the stage executor,
// filtered listing and the search hand-offs.

mod controllers_list;
mod dataset_mgr;
mod list;
mod search;

pub use controllers_list::*;
pub use dataset_mgr::*;
pub use list::{ListEntry, ListQuery, SortKey};
pub use search::*;
