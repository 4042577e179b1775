//! MessagePack-RPC engine: message framing, dispatch, session and pump.

mod dispatch;
mod message;
mod ring;
mod session;

pub use message::{
    make_notification, make_request, make_response, RpcMessage, NOTIFICATION_TYPE, REQUEST_TYPE,
    RESPONSE_TYPE,
};
pub use ring::ByteRing;
pub use session::{
    RpcSession, SessionBuilder, SessionConfig, SessionHandle, MSG_BUF_MAX, QUEUE_MAX, TICK,
};
