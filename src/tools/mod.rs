//! 工具层：Tool trait、注册表、执行器，以及房源搜索与看房预约两个工具

pub mod broker;
pub mod executor;
pub mod registry;
pub mod schedule;
pub mod schema;
pub mod search;
pub mod visit_time;

pub use broker::assign_broker;
pub use executor::{ToolExecutor, DEFAULT_TOOL_TIMEOUT_SECS};
pub use registry::{Tool, ToolContext, ToolOutcome, ToolRegistry};
pub use schedule::{contact_link, ScheduleArgs, ScheduleVisitTool, SCHEDULE_TOOL_NAME};
pub use schema::parameters_schema;
pub use search::{
    format_brl, PropertyCard, SearchArgs, SearchPropertiesTool, DEFAULT_MAX_IMAGES, DEFAULT_PAGE_SIZE,
    EXHAUSTED_REPLY, NO_RESULTS_REPLY, SEARCH_TOOL_NAME,
};
pub use visit_time::{parse_visit_time, VisitTime};
