//! License verification and expiry monitoring.
//!
//! A license key is 48 hex chars: the expiry (unix seconds, big-endian u64)
//! followed by a 16-byte BLAKE3 MAC over entitlement and expiry. Keys that
//! expire more than a year out must be activated.

use talkgroup_core::config::LicensingConfig;
use talkgroup_core::crypto::{activation_code, license_mac};
use talkgroup_core::{Event, LicensingStatus};

pub const LICENSE_KEY_HEX_LEN: usize = 48;

/// Keys expiring beyond this horizon need an activation code.
pub const ACTIVATION_HORIZON_SECS: u64 = 365 * 24 * 60 * 60;

/// Build the key for an entitlement and expiry.
pub fn issue_key(entitlement: &str, expiry: u64) -> String {
    let mut raw = Vec::with_capacity(24);
    raw.extend_from_slice(&expiry.to_be_bytes());
    raw.extend_from_slice(&license_mac(entitlement, expiry));
    hex::encode(raw)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    pub entitlement: String,
    pub key: String,
    /// Unix seconds.
    pub expires: u64,
    pub activated: bool,
}

/// Verify a license triple against the clock.
pub fn verify(
    entitlement: &str,
    key: &str,
    activation: &str,
    now_secs: u64,
) -> Result<License, LicensingStatus> {
    if entitlement.is_empty() {
        return Err(LicensingStatus::NullEntitlementKey);
    }
    if key.is_empty() {
        return Err(LicensingStatus::NullLicenseKey);
    }
    if key.len() != LICENSE_KEY_HEX_LEN {
        return Err(LicensingStatus::InvalidLicenseKeyLen);
    }
    let raw = hex::decode(key).map_err(|_| LicensingStatus::LicenseKeyVerificationFailure)?;
    let (expiry_bytes, mac) = raw.split_at(8);
    let mut be = [0u8; 8];
    be.copy_from_slice(expiry_bytes);
    let expires = u64::from_be_bytes(be);

    if mac != license_mac(entitlement, expires).as_slice() {
        return Err(LicensingStatus::LicenseKeyVerificationFailure);
    }
    if expires == 0 {
        return Err(LicensingStatus::InvalidExpirationDate);
    }

    let activated = !activation.is_empty();
    if activated && !activation.eq_ignore_ascii_case(&activation_code(key)) {
        return Err(LicensingStatus::ActivationCodeVerificationFailure);
    }
    if !activated && expires > now_secs.saturating_add(ACTIVATION_HORIZON_SECS) {
        return Err(LicensingStatus::RequiresActivation);
    }

    Ok(License {
        entitlement: entitlement.to_string(),
        key: key.to_string(),
        expires,
        activated,
    })
}

/// Holds the current license and reports expiry transitions once each.
#[derive(Debug)]
pub struct LicenseMonitor {
    license: Option<License>,
    warning_secs: u64,
    warned: bool,
    expired: bool,
}

impl LicenseMonitor {
    pub fn new(warning_secs: u64) -> Self {
        Self {
            license: None,
            warning_secs,
            warned: false,
            expired: false,
        }
    }

    /// Load the license named in configuration, if any. Failures are logged.
    pub fn from_config(config: &LicensingConfig, now_secs: u64) -> Self {
        let mut monitor = Self::new(config.expiring_warning_secs);
        if !config.key.is_empty() {
            let status = monitor.update(
                &config.entitlement,
                &config.key,
                &config.activation_code,
                now_secs,
            );
            if status != LicensingStatus::Ok {
                tracing::warn!(status = status.name(), "configured license rejected");
            }
        }
        monitor
    }

    /// Replace the license. On failure the previous license stays in force.
    pub fn update(
        &mut self,
        entitlement: &str,
        key: &str,
        activation: &str,
        now_secs: u64,
    ) -> LicensingStatus {
        match verify(entitlement, key, activation, now_secs) {
            Ok(license) => {
                tracing::info!(
                    expires = license.expires,
                    activated = license.activated,
                    "license updated"
                );
                self.license = Some(license);
                self.warned = false;
                self.expired = false;
                LicensingStatus::Ok
            }
            Err(status) => status,
        }
    }

    pub fn license(&self) -> Option<&License> {
        self.license.as_ref()
    }

    /// Seconds until expiry; 0 once expired. None without a license.
    pub fn seconds_left(&self, now_secs: u64) -> Option<u64> {
        self.license
            .as_ref()
            .map(|l| l.expires.saturating_sub(now_secs))
    }

    /// Called periodically. Emits LicenseExpiring once inside the warning
    /// window and LicenseExpired once at expiry.
    pub fn check(&mut self, now_secs: u64) -> Option<Event> {
        let left = self.seconds_left(now_secs)?;
        if left == 0 {
            if self.expired {
                return None;
            }
            self.expired = true;
            self.warned = true;
            tracing::warn!("license expired");
            return Some(Event::LicenseExpired);
        }
        if left <= self.warning_secs && !self.warned {
            self.warned = true;
            return Some(Event::LicenseExpiring { seconds_left: left });
        }
        None
    }
}
