//! Registration of the persistence failure session with the node state
//! manager.
use reactor::bus::{Arg, Message};

pub const SESSION_MANAGER: &str = "org.genivi.NodeStateManager";
pub const SESSION_NAME: &str = "PersistenceFailure";
pub const SESSION_OWNER: &str = "PersistenceHealthMonitor";

const CONSUMER_PATH: &str = "/org/genivi/NodeStateManager/Consumer";
const CONSUMER_INTERFACE: &str = "org.genivi.NodeStateManager.Consumer";
const SEAT_DRIVER: i64 = 1;
const STATE_INACTIVE: i64 = 1;

/// `RegisterSession` call announcing an inactive failure session on the
/// driver seat. Sent once at startup; its reply is not awaited.
pub fn session_registration() -> Message {
    Message::method_call(
        CONSUMER_PATH,
        CONSUMER_INTERFACE,
        "RegisterSession",
        vec![
            SESSION_NAME.into(),
            SESSION_OWNER.into(),
            Arg::Int(SEAT_DRIVER),
            Arg::Int(STATE_INACTIVE),
        ],
    )
}
