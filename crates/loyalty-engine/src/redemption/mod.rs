//! 礼品兑换状态机
//!
//! ## 状态流转
//!
//! ```text
//! pending -> approved -> sent -> completed
//!    |          |          |
//!    |          |          +-> not_received (参与者确认未收到 / 管理员标记)
//!    |          +------------> rejected      (仅管理员)
//!    +-> cancelled_by_user    (申请后一小时内)
//! ```
//!
//! 退回状态的花费不计入已承诺支出，余额自然恢复，无需单独退款。

mod service;
mod transitions;

pub use service::{RedemptionResponse, RedemptionService};
pub use transitions::{check_operator_transition, required_role};
