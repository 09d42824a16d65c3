//! 运营侧状态迁移表

use crate::error::{LoyaltyError, Result};
use crate::models::{OperatorRole, RedemptionStatus};

/// 运营迁移 `from -> to` 所需的最低角色，`None` 表示不存在该运营迁移
pub fn required_role(from: RedemptionStatus, to: RedemptionStatus) -> Option<OperatorRole> {
    use RedemptionStatus::*;

    match (from, to) {
        (Pending, Approved) => Some(OperatorRole::CallCenter),
        (Pending | Approved, Sent) => Some(OperatorRole::CallCenter),
        (Sent, Completed) => Some(OperatorRole::Agent),
        (Pending | Approved | Sent, Rejected) => Some(OperatorRole::Administrator),
        (Sent, NotReceived) => Some(OperatorRole::Administrator),
        _ => None,
    }
}

/// 校验运营迁移：先校验迁移本身，再校验角色
pub fn check_operator_transition(
    request_id: i64,
    role: OperatorRole,
    from: RedemptionStatus,
    to: RedemptionStatus,
) -> Result<()> {
    let required = required_role(from, to).ok_or_else(|| LoyaltyError::InvalidTransition {
        request_id,
        from: from.to_string(),
        to: to.to_string(),
    })?;

    if role < required {
        return Err(LoyaltyError::PermissionDenied {
            role: role.as_str().to_string(),
            action: format!("{} -> {}", from, to),
        });
    }
    Ok(())
}
