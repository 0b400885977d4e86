//! Immediate result codes returned by engine commands.
//!
//! The numeric codes are part of the external contract and never change.

use serde::{Deserialize, Serialize};

/// Outcome of submitting an engine command. The operation's actual outcome
/// arrives later as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum EngineResult {
    Ok,
    InvalidParameters,
    NotInitialized,
    AlreadyInitialized,
    GeneralFailure,
}

impl EngineResult {
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::InvalidParameters => -1,
            Self::NotInitialized => -2,
            Self::AlreadyInitialized => -3,
            Self::GeneralFailure => -4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidParameters => "invalid_parameters",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::GeneralFailure => "general_failure",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<EngineResult> for i32 {
    fn from(r: EngineResult) -> i32 {
        r.code()
    }
}

impl TryFrom<i32> for EngineResult {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Ok),
            -1 => Ok(Self::InvalidParameters),
            -2 => Ok(Self::NotInitialized),
            -3 => Ok(Self::AlreadyInitialized),
            -4 => Ok(Self::GeneralFailure),
            other => Err(format!("unknown engine result code {other}")),
        }
    }
}

impl std::fmt::Display for EngineResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Outcome of a license update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum LicensingStatus {
    Ok,
    NullEntitlementKey,
    NullLicenseKey,
    InvalidLicenseKeyLen,
    LicenseKeyVerificationFailure,
    ActivationCodeVerificationFailure,
    InvalidExpirationDate,
    GeneralFailure,
    NotInitialized,
    RequiresActivation,
}

const LICENSING_ORDER: [LicensingStatus; 10] = [
    LicensingStatus::Ok,
    LicensingStatus::NullEntitlementKey,
    LicensingStatus::NullLicenseKey,
    LicensingStatus::InvalidLicenseKeyLen,
    LicensingStatus::LicenseKeyVerificationFailure,
    LicensingStatus::ActivationCodeVerificationFailure,
    LicensingStatus::InvalidExpirationDate,
    LicensingStatus::GeneralFailure,
    LicensingStatus::NotInitialized,
    LicensingStatus::RequiresActivation,
];

impl LicensingStatus {
    /// 0 for Ok, then -1 through -9 in declaration order.
    pub fn code(self) -> i32 {
        let idx = LICENSING_ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or(LICENSING_ORDER.len() - 1);
        -(idx as i32)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NullEntitlementKey => "null_entitlement_key",
            Self::NullLicenseKey => "null_license_key",
            Self::InvalidLicenseKeyLen => "invalid_license_key_len",
            Self::LicenseKeyVerificationFailure => "license_key_verification_failure",
            Self::ActivationCodeVerificationFailure => "activation_code_verification_failure",
            Self::InvalidExpirationDate => "invalid_expiration_date",
            Self::GeneralFailure => "general_failure",
            Self::NotInitialized => "not_initialized",
            Self::RequiresActivation => "requires_activation",
        }
    }
}

impl From<LicensingStatus> for i32 {
    fn from(s: LicensingStatus) -> i32 {
        s.code()
    }
}

impl TryFrom<i32> for LicensingStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        if code > 0 {
            return Err(format!("unknown licensing status code {code}"));
        }
        LICENSING_ORDER
            .get(code.unsigned_abs() as usize)
            .copied()
            .ok_or_else(|| format!("unknown licensing status code {code}"))
    }
}
