use chisel_registry::HookPoint;

/// Everything the placement check needs to know, snapshotted so hook
/// closures stay free of locks.
#[derive(Debug, Clone)]
pub struct PlacementCtx {
    pub block_id: u8,
    pub is_op: bool,
    pub is_liquid: bool,
    pub is_disabled: bool,
    pub allow_liquid_placement: bool,
}

/// Outcome of the placement check pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementVerdict {
    Allow,
    /// Allowed (op bypass), but the actor gets a warning line.
    Warn(String),
    Deny(String),
}

#[derive(Debug, Clone)]
pub struct ChatCtx {
    pub message: String,
    pub allow_player_color: bool,
}

/// The hook points CPE/feature modules layer onto. Targets are the core
/// behavior; modules wrap them during startup, before the server runs.
pub struct ServerHooks {
    pub placement_check: HookPoint<PlacementCtx, PlacementVerdict>,
    pub chat_format: HookPoint<ChatCtx, String>,
}

impl ServerHooks {
    pub fn new() -> Self {
        Self {
            placement_check: HookPoint::new(base_placement_check),
            chat_format: HookPoint::new(base_chat_format),
        }
    }
}

impl Default for ServerHooks {
    fn default() -> Self {
        Self::new()
    }
}

/// Core rule: the disabled-block list denies placement, with an op
/// bypass that still warns.
fn base_placement_check(ctx: &PlacementCtx) -> PlacementVerdict {
    tracing::trace!(block = ctx.block_id, op = ctx.is_op, "placement check");
    if ctx.is_disabled {
        if ctx.is_op {
            return PlacementVerdict::Warn(
                "&4[WARNING] &fThis Block Is Disabled, But You Are an OP!".into(),
            );
        }
        return PlacementVerdict::Deny("You Cannot Place This Block".into());
    }
    PlacementVerdict::Allow
}

/// Core rule: '%' becomes a color escape only when the server allows
/// player colors.
fn base_chat_format(ctx: &ChatCtx) -> String {
    if ctx.allow_player_color {
        ctx.message.replace('%', "&")
    } else {
        ctx.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(block_id: u8) -> PlacementCtx {
        PlacementCtx {
            block_id,
            is_op: false,
            is_liquid: false,
            is_disabled: false,
            allow_liquid_placement: false,
        }
    }

    #[test]
    fn test_base_placement_allows_normal_blocks() {
        let hooks = ServerHooks::new();
        assert_eq!(hooks.placement_check.call(&ctx(1)), PlacementVerdict::Allow);
    }

    #[test]
    fn test_disabled_block_denied_for_non_op() {
        let hooks = ServerHooks::new();
        let mut c = ctx(46);
        c.is_disabled = true;
        assert!(matches!(
            hooks.placement_check.call(&c),
            PlacementVerdict::Deny(_)
        ));
        c.is_op = true;
        assert!(matches!(
            hooks.placement_check.call(&c),
            PlacementVerdict::Warn(_)
        ));
    }

    #[test]
    fn test_chat_format_rewrites_percent_only_when_allowed() {
        let hooks = ServerHooks::new();
        let formatted = hooks.chat_format.call(&ChatCtx {
            message: "%chello".into(),
            allow_player_color: true,
        });
        assert_eq!(formatted, "&chello");
        let kept = hooks.chat_format.call(&ChatCtx {
            message: "%chello".into(),
            allow_player_color: false,
        });
        assert_eq!(kept, "%chello");
    }
}
