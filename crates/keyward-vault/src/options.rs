//! Per-call backend configuration.
//!
//! Before each get or set the access serializer turns the caller's
//! attributes (or authentication prompt) into an [`ItemOptions`] value by
//! applying a [`Modifier`].  Backends only ever see `ItemOptions`; they never
//! need to know which attribute variant the caller used.

use crate::attributes::{Accessibility, Attributes, AuthenticationPolicy, ItemAttributes, Partition};

/// A single adjustment applied to [`ItemOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    /// Configure label, comment, sync flag, accessibility and policy.
    Attributes(Attributes),
    /// Forward a prompt shown while the user authenticates.
    AuthPrompt(String),
}

impl Modifier {
    pub fn from_attributes(attributes: Option<Attributes>) -> Option<Self> {
        attributes.map(Self::Attributes)
    }

    pub fn from_prompt(prompt: Option<String>) -> Option<Self> {
        prompt.map(Self::AuthPrompt)
    }
}

/// Everything a backend needs to know about one get or set call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemOptions {
    pub partition: Partition,
    pub label: Option<String>,
    pub comment: Option<String>,
    /// `None` leaves the backend default untouched.
    pub synchronizable: Option<bool>,
    pub accessibility: Option<Accessibility>,
    pub authentication_policy: Option<AuthenticationPolicy>,
    pub authentication_prompt: Option<String>,
    /// Match entries regardless of their sync flag.
    pub ignoring_sync: bool,
}

impl ItemOptions {
    /// Options for the no-auth partition with nothing configured.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn synchronizable(mut self, synchronizable: bool) -> Self {
        self.synchronizable = Some(synchronizable);
        self
    }

    /// Set the accessibility class and, optionally, an authentication policy.
    ///
    /// A policy moves the entry into the auth-gated partition.
    pub fn accessibility(
        mut self,
        accessibility: Accessibility,
        policy: Option<AuthenticationPolicy>,
    ) -> Self {
        self.accessibility = Some(accessibility);
        if let Some(policy) = policy {
            self.authentication_policy = Some(policy);
            self.partition = Partition::RequiresAuth;
        }
        self
    }

    /// Forward `prompt` to the backend and target the auth-gated partition.
    pub fn authentication_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.authentication_prompt = Some(prompt.into());
        self.partition = Partition::RequiresAuth;
        self
    }

    pub fn ignoring_sync(mut self, ignoring_sync: bool) -> Self {
        self.ignoring_sync = ignoring_sync;
        self
    }

    /// Apply every field of `attributes`.
    ///
    /// A policy without an accessibility class has no effect on the platform
    /// keychain, so it is dropped here rather than silently misapplied.
    pub fn with_attributes(mut self, attributes: &dyn ItemAttributes) -> Self {
        if let Some(label) = attributes.label() {
            self = self.label(label);
        }
        if let Some(comment) = attributes.comment() {
            self = self.comment(comment);
        }
        self = self.synchronizable(attributes.is_synchronizable());

        match (attributes.accessibility(), attributes.authentication_policy()) {
            (Some(accessibility), policy) => self.accessibility(accessibility, policy),
            (None, Some(policy)) => {
                tracing::warn!(
                    policy = policy.bits(),
                    "authentication policy ignored: no accessibility class given"
                );
                self
            }
            (None, None) => self,
        }
    }

    /// Apply `modifier` if present; `None` leaves the options unchanged.
    pub fn modifier(self, modifier: Option<Modifier>) -> Self {
        match modifier {
            None => self,
            Some(Modifier::Attributes(attributes)) => self.with_attributes(&attributes),
            Some(Modifier::AuthPrompt(prompt)) => self.authentication_prompt(prompt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributesWithAuth, AttributesWithoutAuth};

    /// A hand-rolled attribute type that sets a policy without accessibility.
    struct PolicyOnly;

    impl ItemAttributes for PolicyOnly {
        fn label(&self) -> Option<&str> {
            None
        }
        fn comment(&self) -> Option<&str> {
            None
        }
        fn is_synchronizable(&self) -> bool {
            false
        }
        fn accessibility(&self) -> Option<Accessibility> {
            None
        }
        fn authentication_policy(&self) -> Option<AuthenticationPolicy> {
            Some(AuthenticationPolicy::USER_PRESENCE)
        }
    }

    #[test]
    fn no_modifier_is_identity() {
        let options = ItemOptions::new().ignoring_sync(true);
        assert_eq!(options.clone().modifier(None), options);
    }

    #[test]
    fn with_auth_attributes_target_auth_partition() {
        let attrs = Attributes::from(
            AttributesWithAuth::new(
                Accessibility::WhenUnlockedThisDeviceOnly,
                AuthenticationPolicy::BIOMETRY_ANY,
            )
            .with_label("seed"),
        );

        let options = ItemOptions::new().modifier(Modifier::from_attributes(Some(attrs)));

        assert_eq!(options.partition, Partition::RequiresAuth);
        assert_eq!(options.label.as_deref(), Some("seed"));
        assert_eq!(options.synchronizable, Some(false));
        assert_eq!(
            options.accessibility,
            Some(Accessibility::WhenUnlockedThisDeviceOnly)
        );
        assert_eq!(
            options.authentication_policy,
            Some(AuthenticationPolicy::BIOMETRY_ANY)
        );
    }

    #[test]
    fn without_auth_attributes_stay_in_no_auth_partition() {
        let attrs = AttributesWithoutAuth::new()
            .with_comment("cache")
            .synchronizable(true);

        let options = ItemOptions::new().with_attributes(&attrs);

        assert_eq!(options.partition, Partition::NoAuth);
        assert_eq!(options.comment.as_deref(), Some("cache"));
        assert_eq!(options.synchronizable, Some(true));
        assert_eq!(options.accessibility, None);
        assert_eq!(options.authentication_policy, None);
    }

    #[test]
    fn prompt_modifier_targets_auth_partition() {
        let options =
            ItemOptions::new().modifier(Modifier::from_prompt(Some("Unlock wallet".into())));

        assert_eq!(options.partition, Partition::RequiresAuth);
        assert_eq!(options.authentication_prompt.as_deref(), Some("Unlock wallet"));
    }

    #[test]
    fn policy_without_accessibility_is_dropped() {
        let options = ItemOptions::new().with_attributes(&PolicyOnly);

        assert_eq!(options.partition, Partition::NoAuth);
        assert_eq!(options.authentication_policy, None);
    }
}
