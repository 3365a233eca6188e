//! CLI argument definitions for keyward.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use keyward_vault::{Accessibility, AttributesWithAuth, AttributesWithoutAuth, AuthenticationPolicy};

/// keyward -- serialized access to the platform secure store.
#[derive(Parser)]
#[command(
    name = "keyward",
    version,
    about = "keyward -- serialized access to the platform secure store",
    long_about = "Reads, writes and watches entries of a secure store service. On platforms \
                  without a supported keychain the store lives in memory for the duration \
                  of the command."
)]
pub struct Cli {
    /// Store configuration file (.toml or .json).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Service namespace; overrides the configuration.
    #[arg(long, global = true)]
    pub service: Option<String>,

    /// Access group; overrides the configuration.
    #[arg(long, global = true)]
    pub access_group: Option<String>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the value stored under a key.
    Get {
        key: String,

        /// Read the auth-gated partition, showing this prompt.
        #[arg(long)]
        prompt: Option<String>,

        #[command(flatten)]
        sync: SyncArgs,

        #[command(flatten)]
        encoding: EncodingArgs,
    },

    /// Store a value under a key.
    Set {
        key: String,
        value: String,

        #[command(flatten)]
        protection: ProtectionArgs,

        #[command(flatten)]
        sync: SyncArgs,

        #[command(flatten)]
        encoding: EncodingArgs,
    },

    /// Print the value under a key, storing the fallback first if absent.
    GetOrCreate {
        key: String,
        fallback: String,

        #[command(flatten)]
        protection: ProtectionArgs,

        /// Prompt shown when reading an auth-gated entry.
        #[arg(long, default_value = "Authenticate to read the stored value")]
        prompt: String,

        #[command(flatten)]
        encoding: EncodingArgs,
    },

    /// Remove a key from both partitions.
    Remove {
        key: String,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Remove every entry of the service.
    Clear {
        /// Confirm the removal.
        #[arg(long)]
        yes: bool,
    },

    /// Print change events until interrupted.
    Watch {
        /// Only report events for this key.
        key: Option<String>,

        /// Emit one JSON object per line.
        #[arg(long)]
        json: bool,
    },
}

/// Sync-flag matching shared by reads and writes.
#[derive(Args, Clone, Copy)]
pub struct SyncArgs {
    /// Only match entries that are not synchronized.
    #[arg(long)]
    pub respect_sync: bool,
}

impl SyncArgs {
    pub fn ignoring_sync(self) -> bool {
        !self.respect_sync
    }
}

#[derive(Args, Clone, Copy)]
pub struct EncodingArgs {
    /// Treat values as base64 on input and print them as base64.
    #[arg(long)]
    pub base64: bool,
}

/// How a written entry is protected.
#[derive(Args, Clone)]
pub struct ProtectionArgs {
    #[arg(long)]
    pub label: Option<String>,

    #[arg(long)]
    pub comment: Option<String>,

    /// Allow the entry to synchronize between devices.
    #[arg(long)]
    pub synchronizable: bool,

    /// Accessibility class, e.g. `when_unlocked_this_device_only`.
    #[arg(long)]
    pub accessibility: Option<Accessibility>,

    /// Require user presence before the entry can be read.
    #[arg(long)]
    pub auth: bool,
}

/// Protection attributes for one of the two partitions.
pub enum Protection {
    WithAuth(AttributesWithAuth),
    WithoutAuth(AttributesWithoutAuth),
}

impl ProtectionArgs {
    pub fn protection(&self) -> Protection {
        if self.auth {
            let accessibility = self
                .accessibility
                .unwrap_or(Accessibility::WhenUnlockedThisDeviceOnly);
            let mut attributes =
                AttributesWithAuth::new(accessibility, AuthenticationPolicy::USER_PRESENCE)
                    .synchronizable(self.synchronizable);
            if let Some(label) = &self.label {
                attributes = attributes.with_label(label.clone());
            }
            if let Some(comment) = &self.comment {
                attributes = attributes.with_comment(comment.clone());
            }
            return Protection::WithAuth(attributes);
        }

        let mut attributes = AttributesWithoutAuth::new().synchronizable(self.synchronizable);
        if let Some(accessibility) = self.accessibility {
            attributes = attributes.with_accessibility(accessibility);
        }
        if let Some(label) = &self.label {
            attributes = attributes.with_label(label.clone());
        }
        if let Some(comment) = &self.comment {
            attributes = attributes.with_comment(comment.clone());
        }
        Protection::WithoutAuth(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_vault::ItemAttributes;

    #[test]
    fn set_with_auth_builds_gated_attributes() {
        let cli = Cli::parse_from([
            "keyward",
            "--service",
            "wallet",
            "set",
            "seed",
            "value",
            "--auth",
            "--label",
            "Seed",
            "--accessibility",
            "when_passcode_set_this_device_only",
        ]);
        assert_eq!(cli.service.as_deref(), Some("wallet"));

        let Commands::Set { protection, sync, .. } = cli.command else {
            panic!("expected set");
        };
        assert!(sync.ignoring_sync());

        let Protection::WithAuth(attributes) = protection.protection() else {
            panic!("expected gated attributes");
        };
        assert_eq!(attributes.label(), Some("Seed"));
        assert_eq!(
            attributes.accessibility(),
            Some(Accessibility::WhenPasscodeSetThisDeviceOnly)
        );
        assert_eq!(
            attributes.authentication_policy(),
            Some(AuthenticationPolicy::USER_PRESENCE)
        );
    }

    #[test]
    fn plain_set_has_no_policy() {
        let cli = Cli::parse_from(["keyward", "set", "k", "v", "--respect-sync"]);
        let Commands::Set { protection, sync, .. } = cli.command else {
            panic!("expected set");
        };
        assert!(!sync.ignoring_sync());
        let Protection::WithoutAuth(attributes) = protection.protection() else {
            panic!("expected plain attributes");
        };
        assert_eq!(attributes.authentication_policy(), None);
    }

    #[test]
    fn unknown_accessibility_is_rejected() {
        let parsed = Cli::try_parse_from(["keyward", "set", "k", "v", "--accessibility", "never"]);
        assert!(parsed.is_err());
    }
}
