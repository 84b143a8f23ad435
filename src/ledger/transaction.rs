use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::hashing::{self, HashingError};

/// Record types accepted by the ledger
const VALID_RECORD_TYPES: &[&str] = &[
    "Diagnosis",
    "Prescription",
    "Test",
    "Emergency",
    "Consultation",
    "Surgery",
    "Lab_Result",
];

/// Operations accepted by the ledger
const VALID_OPERATIONS: &[&str] = &["Add", "Update", "Share", "Emergency_Add", "Delete"];

/// Errors raised when transaction or user data fails validation
///
/// Validation failures are locally recoverable: the operation is rejected and
/// no ledger state changes.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Empty value for required field: {0}")]
    EmptyField(&'static str),

    #[error("Invalid format for {0}. Use alphanumeric characters, hyphens, or underscores only")]
    InvalidIdFormat(&'static str),

    #[error("{field} must be between {min} and {max} characters")]
    IdLengthOutOfRange {
        field: &'static str,
        min: usize,
        max: usize,
    },

    #[error("Invalid record type: {0}")]
    InvalidRecordType(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Prescription/details too long. Maximum {0} characters")]
    DetailsTooLong(usize),

    #[error("Invalid name format. Use letters, spaces, dots, and hyphens only")]
    InvalidName,

    #[error("User not found: {0}")]
    UnknownUser(String),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Not a registered doctor: {0}")]
    NotADoctor(String),

    #[error("Not a registered patient: {0}")]
    NotAPatient(String),

    #[error("Consent already exists for doctor {0}")]
    DuplicateConsent(String),

    #[error("No consent exists for doctor {0}")]
    MissingConsent(String),

    #[error("Stake cannot be negative: {0}")]
    NegativeStake(f64),

    #[error("Stake must be a finite number")]
    NonFiniteStake,

    #[error("Hashing error: {0}")]
    Hashing(#[from] HashingError),
}

/// A healthcare-record transaction
///
/// Immutable once included in a block. Identity for hashing purposes is the
/// canonical (sorted-key, compact) JSON serialization; optional fields that
/// are absent are omitted from the canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecordTransaction {
    /// Hospital where the record originates
    pub hospital_id: String,

    /// Attending physician
    pub doctor_id: String,

    /// Patient the record belongs to
    pub patient_id: String,

    /// Medical record identifier
    pub record_id: String,

    /// One of: Diagnosis, Prescription, Test, Emergency, Consultation, Surgery, Lab_Result
    pub record_type: String,

    /// One of: Add, Update, Share, Emergency_Add, Delete
    pub operation: String,

    /// Insurance provider identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance_id: Option<String>,

    /// Prescription or free-form medical details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,

    /// Associated billing amount, kept as entered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,

    /// Creation timestamp as supplied by the author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Marks a consent-bypassing emergency record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<bool>,
}

/// Checks that an id uses only alphanumeric characters, hyphens, or underscores
pub(crate) fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl RecordTransaction {
    /// Computes the transaction fingerprint
    ///
    /// # Returns
    ///
    /// The SHA-256 hex digest over the canonical serialization
    pub fn fingerprint(&self) -> Result<String, ValidationError> {
        Ok(hashing::fingerprint(self)?)
    }

    /// Returns true if this is an emergency transaction
    pub fn is_emergency(&self) -> bool {
        self.emergency.unwrap_or(false)
    }

    /// Validates the transaction's fields
    ///
    /// # Returns
    ///
    /// Ok(()) if the transaction is well-formed, the violated rule otherwise
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required: [(&'static str, &str); 6] = [
            ("hospital_id", &self.hospital_id),
            ("doctor_id", &self.doctor_id),
            ("patient_id", &self.patient_id),
            ("record_id", &self.record_id),
            ("record_type", &self.record_type),
            ("operation", &self.operation),
        ];

        for (field, value) in &required {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(field));
            }
        }

        let id_fields: [(&'static str, &str); 4] = [
            ("hospital_id", &self.hospital_id),
            ("doctor_id", &self.doctor_id),
            ("patient_id", &self.patient_id),
            ("record_id", &self.record_id),
        ];

        for (field, value) in &id_fields {
            if !is_valid_id(value) {
                return Err(ValidationError::InvalidIdFormat(field));
            }
            if value.len() < 3 || value.len() > 50 {
                return Err(ValidationError::IdLengthOutOfRange {
                    field,
                    min: 3,
                    max: 50,
                });
            }
        }

        if !VALID_RECORD_TYPES.contains(&self.record_type.as_str()) {
            return Err(ValidationError::InvalidRecordType(self.record_type.clone()));
        }

        if !VALID_OPERATIONS.contains(&self.operation.as_str()) {
            return Err(ValidationError::InvalidOperation(self.operation.clone()));
        }

        if let Some(amount) = self.amount.as_deref().filter(|a| !a.trim().is_empty()) {
            let parsed: f64 = amount
                .trim()
                .parse()
                .map_err(|_| ValidationError::InvalidAmount(amount.to_string()))?;
            // f64::parse accepts "NaN" and "inf", which dodge the range checks
            if !parsed.is_finite() {
                return Err(ValidationError::InvalidAmount(amount.to_string()));
            }
            if parsed < 0.0 {
                return Err(ValidationError::InvalidAmount(
                    "Amount cannot be negative".to_string(),
                ));
            }
            if parsed > 1_000_000.0 {
                return Err(ValidationError::InvalidAmount(
                    "Amount too large. Maximum 1,000,000".to_string(),
                ));
            }
        }

        if let Some(prescription) = &self.prescription {
            if prescription.len() > 1000 {
                return Err(ValidationError::DetailsTooLong(1000));
            }
        }

        if let Some(insurance_id) = self.insurance_id.as_deref().filter(|i| !i.trim().is_empty()) {
            if !is_valid_id(insurance_id) {
                return Err(ValidationError::InvalidIdFormat("insurance_id"));
            }
            if insurance_id.len() > 30 {
                return Err(ValidationError::IdLengthOutOfRange {
                    field: "insurance_id",
                    min: 1,
                    max: 30,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> RecordTransaction {
        RecordTransaction {
            hospital_id: "hosp-01".to_string(),
            doctor_id: "doc-01".to_string(),
            patient_id: "pat-01".to_string(),
            record_id: "rec-001".to_string(),
            record_type: "Diagnosis".to_string(),
            operation: "Add".to_string(),
            insurance_id: None,
            prescription: Some("Amoxicillin 500mg".to_string()),
            amount: Some("120.50".to_string()),
            timestamp: Some("2024-01-01T12:00:00Z".to_string()),
            emergency: None,
        }
    }

    #[test]
    fn test_valid_transaction_passes() {
        assert!(sample_transaction().validate().is_ok());
    }

    #[test]
    fn test_fingerprint_is_content_addressed() {
        let a = sample_transaction();
        // Same content, independently constructed
        let b = sample_transaction();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let mut c = sample_transaction();
        c.prescription = Some("Amoxicillin 250mg".to_string());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_ignores_json_key_order() {
        let tx = sample_transaction();

        // Deserialize from JSON with deliberately scrambled key order
        let scrambled: RecordTransaction = serde_json::from_str(
            r#"{
                "timestamp": "2024-01-01T12:00:00Z",
                "operation": "Add",
                "amount": "120.50",
                "record_type": "Diagnosis",
                "hospital_id": "hosp-01",
                "prescription": "Amoxicillin 500mg",
                "record_id": "rec-001",
                "patient_id": "pat-01",
                "doctor_id": "doc-01"
            }"#,
        )
        .unwrap();

        assert_eq!(tx.fingerprint().unwrap(), scrambled.fingerprint().unwrap());
    }

    #[test]
    fn test_rejects_empty_required_field() {
        let mut tx = sample_transaction();
        tx.hospital_id = " ".to_string();
        assert!(matches!(
            tx.validate(),
            Err(ValidationError::EmptyField("hospital_id"))
        ));
    }

    #[test]
    fn test_rejects_bad_id_charset() {
        let mut tx = sample_transaction();
        tx.record_id = "rec;drop".to_string();
        assert!(matches!(
            tx.validate(),
            Err(ValidationError::InvalidIdFormat("record_id"))
        ));
    }

    #[test]
    fn test_rejects_unknown_record_type_and_operation() {
        let mut tx = sample_transaction();
        tx.record_type = "Horoscope".to_string();
        assert!(matches!(
            tx.validate(),
            Err(ValidationError::InvalidRecordType(_))
        ));

        let mut tx = sample_transaction();
        tx.operation = "Destroy".to_string();
        assert!(matches!(
            tx.validate(),
            Err(ValidationError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_rejects_bad_amounts() {
        let mut tx = sample_transaction();
        tx.amount = Some("not-a-number".to_string());
        assert!(matches!(
            tx.validate(),
            Err(ValidationError::InvalidAmount(_))
        ));

        let mut tx = sample_transaction();
        tx.amount = Some("-5".to_string());
        assert!(tx.validate().is_err());

        let mut tx = sample_transaction();
        tx.amount = Some("2000000".to_string());
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_amounts() {
        // These parse as f64 but are outside any sane billing range
        for amount in ["NaN", "nan", "inf", "-inf", "infinity"] {
            let mut tx = sample_transaction();
            tx.amount = Some(amount.to_string());
            assert!(
                matches!(tx.validate(), Err(ValidationError::InvalidAmount(_))),
                "amount {amount:?} should be rejected"
            );
        }
    }
}
