//! # Permission Bitfields
//!
//! Discord permission bits and channel-level permission resolution.
//!
//! ## Permission Resolution
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   PERMISSION RESOLUTION ORDER                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Base = @everyone role permissions OR every assigned role            │
//! │  2. Administrator in base bypasses everything                           │
//! │  3. Apply the @everyone channel overwrite (deny, then allow)            │
//! │  4. Apply all role overwrites together (OR'd deny, then OR'd allow)     │
//! │  5. Apply the member overwrite (deny, then allow)                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// A set of Discord permissions represented as a bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Permissions(u64);

impl Permissions {
    /// No permissions.
    pub const NONE: Permissions = Permissions(0);
    /// All permissions.
    pub const ALL: Permissions = Permissions(u64::MAX);

    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const MANAGE_CHANNELS: Permissions = Permissions(1 << 4);
    pub const MANAGE_GUILD: Permissions = Permissions(1 << 5);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const MANAGE_MESSAGES: Permissions = Permissions(1 << 13);
    pub const READ_MESSAGE_HISTORY: Permissions = Permissions(1 << 16);
    pub const MENTION_EVERYONE: Permissions = Permissions(1 << 17);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);
    pub const MANAGE_WEBHOOKS: Permissions = Permissions(1 << 29);
    pub const MANAGE_GUILD_EXPRESSIONS: Permissions = Permissions(1 << 30);

    /// Create from a raw bitfield value.
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bitfield value.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Parse the decimal string form Discord uses on the wire.
    pub fn from_string(s: &str) -> Self {
        Self(s.parse::<u64>().unwrap_or(0))
    }

    /// Check whether every bit of `perm` is set. Administrator implies all.
    pub fn has(&self, perm: Permissions) -> bool {
        if self.0 & Self::ADMINISTRATOR.0 != 0 {
            return true;
        }
        self.0 & perm.0 == perm.0
    }

    /// Merge with another permission set (OR).
    pub fn merge(&self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }

    /// Apply one (allow, deny) overwrite: deny removes, then allow adds.
    fn apply(self, allow: u64, deny: u64) -> Permissions {
        Permissions((self.0 & !deny) | allow)
    }
}

/// An (allow, deny) pair from a channel permission overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverwriteBits {
    pub allow: u64,
    pub deny: u64,
}

/// Compute a member's effective permissions in one channel.
///
/// `base` must already be the OR of the @everyone role and every role the
/// member holds. `role_overwrites` are the channel overwrites for the
/// member's roles only (not @everyone).
pub fn compute_channel_permissions(
    base: Permissions,
    everyone_overwrite: Option<OverwriteBits>,
    role_overwrites: &[OverwriteBits],
    member_overwrite: Option<OverwriteBits>,
) -> Permissions {
    if base.has(Permissions::ADMINISTRATOR) {
        return Permissions::ALL;
    }

    let mut perms = base;

    if let Some(ow) = everyone_overwrite {
        perms = perms.apply(ow.allow, ow.deny);
    }

    let (allow, deny) = role_overwrites
        .iter()
        .fold((0u64, 0u64), |(a, d), ow| (a | ow.allow, d | ow.deny));
    perms = perms.apply(allow, deny);

    if let Some(ow) = member_overwrite {
        perms = perms.apply(ow.allow, ow.deny);
    }

    perms
}

/// Whether a permission set allows reading a channel's history.
pub fn can_read_history(perms: Permissions) -> bool {
    perms.has(Permissions::VIEW_CHANNEL) && perms.has(Permissions::READ_MESSAGE_HISTORY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_perms() -> Permissions {
        Permissions::VIEW_CHANNEL.merge(Permissions::READ_MESSAGE_HISTORY)
    }

    #[test]
    fn test_administrator_bypasses_overwrites() {
        let base = Permissions::ADMINISTRATOR;
        let deny_all = OverwriteBits { allow: 0, deny: u64::MAX };
        let result = compute_channel_permissions(base, Some(deny_all), &[deny_all], Some(deny_all));
        assert_eq!(result, Permissions::ALL);
    }

    #[test]
    fn test_everyone_overwrite_denies_view() {
        let everyone = OverwriteBits {
            allow: 0,
            deny: Permissions::VIEW_CHANNEL.bits(),
        };
        let result = compute_channel_permissions(read_perms(), Some(everyone), &[], None);
        assert!(!result.has(Permissions::VIEW_CHANNEL));
        assert!(result.has(Permissions::READ_MESSAGE_HISTORY));
        assert!(!can_read_history(result));
    }

    #[test]
    fn test_role_allow_beats_role_deny() {
        // One role denies history, another allows it: allow wins.
        let deny = OverwriteBits {
            allow: 0,
            deny: Permissions::READ_MESSAGE_HISTORY.bits(),
        };
        let allow = OverwriteBits {
            allow: Permissions::READ_MESSAGE_HISTORY.bits(),
            deny: 0,
        };
        let result = compute_channel_permissions(read_perms(), None, &[deny, allow], None);
        assert!(can_read_history(result));
    }

    #[test]
    fn test_member_overwrite_applied_last() {
        let role_allow = OverwriteBits {
            allow: Permissions::VIEW_CHANNEL.bits(),
            deny: 0,
        };
        let member_deny = OverwriteBits {
            allow: 0,
            deny: Permissions::VIEW_CHANNEL.bits(),
        };
        let result =
            compute_channel_permissions(read_perms(), None, &[role_allow], Some(member_deny));
        assert!(!result.has(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn test_from_string() {
        assert_eq!(Permissions::from_string("1024"), Permissions::VIEW_CHANNEL);
        assert_eq!(Permissions::from_string("garbage"), Permissions::NONE);
    }
}
