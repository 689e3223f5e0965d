//! Streaming client for remote conversational agents.

pub mod agent;
pub mod frame;
pub mod http_client;

pub use agent::{
    AgentClient, AgentEndpoint, QueryRequest, RemoteError, RemoteEvent,
    RemoteEventStream, RemoteResult, RemoteStreamHandle, RemoteWorker, ToolRequest, ToolResponse,
    make_event_stream,
};
pub use frame::{MAX_TOOL_OUTPUT_BYTES, TRUNCATION_SUFFIX, decode_data, parse_frame};
pub use http_client::HttpAgentClient;
