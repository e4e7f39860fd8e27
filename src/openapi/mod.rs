pub mod loader;
pub mod query;
pub mod spec;

pub use loader::{SpecCache, SpecLoader, SpecSource};
pub use query::{
    get_path_details, list_paths_with_descriptions, resolve_path, OperationDetails, ParameterInfo,
    PathSummary,
};
pub use spec::ApiSpecification;
