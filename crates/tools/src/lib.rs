//! Function-calling entry points onto the AutoDL commands, addressed to the
//! user of the current calling round.

pub mod context;
pub mod grab_tools;
pub mod instance_tools;
pub mod registry;
pub mod traits;

pub use context::{ActiveUser, ActiveUserScope, ToolContext};
pub use grab_tools::{GrabGpuTool, StopGrabTool};
pub use instance_tools::{CheckGpuTool, StartInstanceTool, StopInstanceTool};
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolError, ToolResult};
