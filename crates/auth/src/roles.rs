use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role names that carry administrator capability.
///
/// Several human-facing titles ("Manager", "Owner") grant the same access as
/// "Administrator". The raw label is still kept on [`Role`] for display.
pub const ADMIN_ROLES: [&str; 5] = ["admin", "administrator", "owner", "manager", "superadmin"];

/// Normalized name of the baseline non-admin role.
pub const MEMBER_ROLE: &str = "member";

/// Role as stored on allowlist records and profiles.
///
/// The raw label is preserved verbatim; classification always goes through
/// [`normalize`] so casing and padding never change the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn normalized(&self) -> NormalizedRole {
        normalize(Some(self.as_str()))
    }

    pub fn is_admin(&self) -> bool {
        self.normalized().is_admin()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trimmed, lowercased role name. Empty when no role is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NormalizedRole(String);

impl NormalizedRole {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_admin(&self) -> bool {
        ADMIN_ROLES.contains(&self.0.as_str())
    }

    /// Baseline access: the member role, or anything with admin capability.
    pub fn is_member_or_admin(&self) -> bool {
        self.0 == MEMBER_ROLE || self.is_admin()
    }
}

impl core::fmt::Display for NormalizedRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a raw role string. Missing input normalizes to the empty role.
pub fn normalize(role: Option<&str>) -> NormalizedRole {
    NormalizedRole(role.map(|r| r.trim().to_lowercase()).unwrap_or_default())
}

/// Admin predicate over raw role input.
pub fn is_admin(role: Option<&str>) -> bool {
    normalize(role).is_admin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_set_is_case_and_whitespace_insensitive() {
        for raw in [
            "admin",
            " Admin ",
            "ADMINISTRATOR",
            "Owner",
            "manager\t",
            "SuperAdmin",
        ] {
            assert!(is_admin(Some(raw)), "{raw:?} should be admin");
        }
    }

    #[test]
    fn everything_outside_the_admin_set_is_not_admin() {
        for raw in [
            "",
            "   ",
            "agent",
            "member",
            "super admin",
            "admins",
            "adm in",
            "root",
        ] {
            assert!(!is_admin(Some(raw)), "{raw:?} should not be admin");
        }
        assert!(!is_admin(None));
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize(Some("  Manager ")).as_str(), "manager");
        assert!(normalize(None).is_empty());
        assert!(normalize(Some("   ")).is_empty());
    }

    #[test]
    fn role_keeps_display_label() {
        let role = Role::new("Manager");
        assert_eq!(role.to_string(), "Manager");
        assert!(role.is_admin());
        assert_eq!(role.normalized().as_str(), "manager");
    }

    #[test]
    fn member_predicate_accepts_member_and_admins() {
        assert!(normalize(Some("Member")).is_member_or_admin());
        assert!(normalize(Some("owner")).is_member_or_admin());
        assert!(!normalize(Some("agent")).is_member_or_admin());
        assert!(!normalize(None).is_member_or_admin());
    }

    proptest::proptest! {
        #[test]
        fn padded_and_recased_admin_titles_stay_admin(
            index in 0..ADMIN_ROLES.len(),
            upper in proptest::collection::vec(proptest::bool::ANY, 13),
            left in "[ \t]{0,3}",
            right in "[ \t]{0,3}",
        ) {
            let title: String = ADMIN_ROLES[index]
                .chars()
                .zip(upper.iter().cycle())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            let raw = format!("{left}{title}{right}");
            proptest::prop_assert!(is_admin(Some(raw.as_str())));
        }

        #[test]
        fn strings_outside_the_set_are_never_admin(raw in "\\PC{0,16}") {
            let normalized = raw.trim().to_lowercase();
            proptest::prop_assume!(!ADMIN_ROLES.contains(&normalized.as_str()));
            proptest::prop_assert!(!is_admin(Some(raw.as_str())));
        }
    }
}
