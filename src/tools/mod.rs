pub mod db;
pub mod registry;
pub mod schema;

pub use registry::{
    json_result, parse_args, FnTool, Tool, ToolError, ToolKind, ToolKit, ToolRegistry,
    ToolSignature, ToolStatistics,
};
pub use schema::params_schema;
