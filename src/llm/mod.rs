//! 生成服务层：客户端抽象与实现（HTTP / Mock）、台词清洗

pub mod http;
pub mod mock;
pub mod sanitize;
pub mod traits;

pub use http::HttpGenerationClient;
pub use mock::{MockCall, MockGenerationClient};
pub use sanitize::{DefaultSanitizer, Sanitize};
pub use traits::{
    ChatTurnRequest, DebateRoundRequest, FinalStatementRequest, GenerationClient, GenerationReply,
    HistoryEntry, SummaryRequest, Utterance,
};
