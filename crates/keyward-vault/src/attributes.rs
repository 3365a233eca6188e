//! Protection attributes for secure store entries.
//!
//! An entry is written with one of two closed attribute variants:
//!
//! - [`AttributesWithoutAuth`] -- readable without user interaction.
//! - [`AttributesWithAuth`] -- gated behind an [`AuthenticationPolicy`], which
//!   is mandatory for this variant and absent from the other.
//!
//! Both implement [`ItemAttributes`] so code that only cares about label,
//! comment, sync flag, or accessibility can treat them uniformly.  The
//! [`Attributes`] sum type carries either variant and decides which
//! [`Partition`] a write targets.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// The authentication regime an entry belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Entries readable without user interaction.
    #[default]
    NoAuth,
    /// Entries that require the user to authenticate.
    RequiresAuth,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAuth => "no_auth",
            Self::RequiresAuth => "requires_auth",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Accessibility
// ---------------------------------------------------------------------------

/// When an entry's data may be read, relative to the device lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    /// Readable while the device is unlocked.
    WhenUnlocked,
    /// Readable after the first unlock following a restart.
    AfterFirstUnlock,
    /// Readable only while a device passcode is set; never migrated.
    WhenPasscodeSetThisDeviceOnly,
    /// Like [`WhenUnlocked`](Self::WhenUnlocked), never migrated.
    WhenUnlockedThisDeviceOnly,
    /// Like [`AfterFirstUnlock`](Self::AfterFirstUnlock), never migrated.
    AfterFirstUnlockThisDeviceOnly,
}

impl Accessibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhenUnlocked => "when_unlocked",
            Self::AfterFirstUnlock => "after_first_unlock",
            Self::WhenPasscodeSetThisDeviceOnly => "when_passcode_set_this_device_only",
            Self::WhenUnlockedThisDeviceOnly => "when_unlocked_this_device_only",
            Self::AfterFirstUnlockThisDeviceOnly => "after_first_unlock_this_device_only",
        }
    }

    /// Whether entries with this class stay on the device that wrote them.
    pub fn is_this_device_only(&self) -> bool {
        matches!(
            self,
            Self::WhenPasscodeSetThisDeviceOnly
                | Self::WhenUnlockedThisDeviceOnly
                | Self::AfterFirstUnlockThisDeviceOnly
        )
    }
}

impl std::fmt::Display for Accessibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Accessibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| format!("unknown accessibility class `{s}`"))
    }
}

impl Accessibility {
    pub const ALL: [Self; 5] = [
        Self::WhenUnlocked,
        Self::AfterFirstUnlock,
        Self::WhenPasscodeSetThisDeviceOnly,
        Self::WhenUnlockedThisDeviceOnly,
        Self::AfterFirstUnlockThisDeviceOnly,
    ];
}

// ---------------------------------------------------------------------------
// Authentication policy
// ---------------------------------------------------------------------------

/// A set of authentication constraints, combined with `|`.
///
/// The flag values mirror the platform access-control options so backends
/// can translate them without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthenticationPolicy(u32);

impl AuthenticationPolicy {
    /// Biometry or device passcode.
    pub const USER_PRESENCE: Self = Self(1 << 0);
    /// Any enrolled biometry.
    pub const BIOMETRY_ANY: Self = Self(1 << 1);
    /// Biometry as enrolled when the entry was written.
    pub const BIOMETRY_CURRENT_SET: Self = Self(1 << 3);
    /// Device passcode.
    pub const DEVICE_PASSCODE: Self = Self(1 << 4);
    /// A paired watch.
    pub const WATCH: Self = Self(1 << 5);
    /// Any one of the listed constraints suffices.
    pub const OR: Self = Self(1 << 14);
    /// All of the listed constraints are required.
    pub const AND: Self = Self(1 << 15);
    /// Private key usage.
    pub const PRIVATE_KEY_USAGE: Self = Self(1 << 30);
    /// An application-supplied password.
    pub const APPLICATION_PASSWORD: Self = Self(1 << 31);

    /// Raw flag bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Build a policy from raw bits, keeping only known flags.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        const KNOWN: u32 = (1 << 0)
            | (1 << 1)
            | (1 << 3)
            | (1 << 4)
            | (1 << 5)
            | (1 << 14)
            | (1 << 15)
            | (1 << 30)
            | (1 << 31);
        Self(bits & KNOWN)
    }

    /// Whether every flag in `other` is also set in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AuthenticationPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Shared capability surface
// ---------------------------------------------------------------------------

/// Read-only view over either attribute variant.
pub trait ItemAttributes: Send + Sync {
    fn label(&self) -> Option<&str>;
    fn comment(&self) -> Option<&str>;
    fn is_synchronizable(&self) -> bool;
    fn accessibility(&self) -> Option<Accessibility>;

    /// The authentication policy, or `None` for entries that do not require
    /// authentication.
    fn authentication_policy(&self) -> Option<AuthenticationPolicy>;
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Attributes for an entry that requires user authentication to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributesWithAuth {
    pub label: Option<String>,
    pub comment: Option<String>,
    pub is_synchronizable: bool,
    pub accessibility: Accessibility,
    pub authentication_policy: AuthenticationPolicy,
}

impl AttributesWithAuth {
    /// Create auth-gated attributes; the entry is not synchronized by default.
    pub fn new(accessibility: Accessibility, authentication_policy: AuthenticationPolicy) -> Self {
        Self {
            label: None,
            comment: None,
            is_synchronizable: false,
            accessibility,
            authentication_policy,
        }
    }

    /// Builder: set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: set the comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Builder: set the cross-device sync flag.
    pub fn synchronizable(mut self, is_synchronizable: bool) -> Self {
        self.is_synchronizable = is_synchronizable;
        self
    }
}

impl ItemAttributes for AttributesWithAuth {
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    fn is_synchronizable(&self) -> bool {
        self.is_synchronizable
    }

    fn accessibility(&self) -> Option<Accessibility> {
        Some(self.accessibility)
    }

    fn authentication_policy(&self) -> Option<AuthenticationPolicy> {
        Some(self.authentication_policy)
    }
}

/// Attributes for an entry readable without user interaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributesWithoutAuth {
    pub label: Option<String>,
    pub comment: Option<String>,
    pub is_synchronizable: bool,
    pub accessibility: Option<Accessibility>,
}

impl AttributesWithoutAuth {
    /// No label, no comment, not synchronized, platform default accessibility.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: set the comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Builder: set the cross-device sync flag.
    pub fn synchronizable(mut self, is_synchronizable: bool) -> Self {
        self.is_synchronizable = is_synchronizable;
        self
    }

    /// Builder: set the accessibility class.
    pub fn with_accessibility(mut self, accessibility: Accessibility) -> Self {
        self.accessibility = Some(accessibility);
        self
    }
}

impl ItemAttributes for AttributesWithoutAuth {
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    fn is_synchronizable(&self) -> bool {
        self.is_synchronizable
    }

    fn accessibility(&self) -> Option<Accessibility> {
        self.accessibility
    }

    fn authentication_policy(&self) -> Option<AuthenticationPolicy> {
        None
    }
}

// ---------------------------------------------------------------------------
// Sum type
// ---------------------------------------------------------------------------

/// Either attribute variant.  The variant decides the target [`Partition`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attributes {
    WithAuth(AttributesWithAuth),
    WithoutAuth(AttributesWithoutAuth),
}

impl Attributes {
    pub fn partition(&self) -> Partition {
        match self {
            Self::WithAuth(_) => Partition::RequiresAuth,
            Self::WithoutAuth(_) => Partition::NoAuth,
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.partition() == Partition::RequiresAuth
    }

    fn as_dyn(&self) -> &dyn ItemAttributes {
        match self {
            Self::WithAuth(attrs) => attrs,
            Self::WithoutAuth(attrs) => attrs,
        }
    }
}

impl From<AttributesWithAuth> for Attributes {
    fn from(attrs: AttributesWithAuth) -> Self {
        Self::WithAuth(attrs)
    }
}

impl From<AttributesWithoutAuth> for Attributes {
    fn from(attrs: AttributesWithoutAuth) -> Self {
        Self::WithoutAuth(attrs)
    }
}

impl ItemAttributes for Attributes {
    fn label(&self) -> Option<&str> {
        self.as_dyn().label()
    }

    fn comment(&self) -> Option<&str> {
        self.as_dyn().comment()
    }

    fn is_synchronizable(&self) -> bool {
        self.as_dyn().is_synchronizable()
    }

    fn accessibility(&self) -> Option<Accessibility> {
        self.as_dyn().accessibility()
    }

    fn authentication_policy(&self) -> Option<AuthenticationPolicy> {
        self.as_dyn().authentication_policy()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
