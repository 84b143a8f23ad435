use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::transaction::{is_valid_id, ValidationError};

/// Role a registered user holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
    Admin,
}

/// A registered doctor or admin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    /// Unique id across all roles
    pub id: String,

    /// Display name
    pub name: String,
}

/// A registered patient, carrying a consent relation to doctors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Patient {
    /// Unique id across all roles
    pub id: String,

    /// Display name
    pub name: String,

    /// Doctor ids this patient has granted consent to
    #[serde(default)]
    pub consent: Vec<String>,
}

/// Role-tagged user directory
///
/// The single source of truth for role membership: scheduler and validation
/// logic must query it rather than keeping their own copies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Registry {
    doctors: Vec<User>,
    patients: Vec<Patient>,
    admins: Vec<User>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a user under the given role
    ///
    /// Ids must be unique across all roles, 2-30 characters from
    /// `[A-Za-z0-9_-]`. Names use letters, spaces, dots, and hyphens,
    /// 2-100 characters.
    pub fn register(&mut self, role: Role, id: &str, name: &str) -> Result<(), ValidationError> {
        let id = id.trim();
        let name = name.trim();

        if id.is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        if name.is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if !is_valid_id(id) {
            return Err(ValidationError::InvalidIdFormat("id"));
        }
        if id.len() < 2 || id.len() > 30 {
            return Err(ValidationError::IdLengthOutOfRange {
                field: "id",
                min: 2,
                max: 30,
            });
        }
        if name.len() < 2
            || name.len() > 100
            || !name
                .chars()
                .all(|c| c.is_alphabetic() || c == ' ' || c == '.' || c == '-')
        {
            return Err(ValidationError::InvalidName);
        }
        if self.contains(id) {
            return Err(ValidationError::DuplicateUser(id.to_string()));
        }

        match role {
            Role::Doctor => self.doctors.push(User {
                id: id.to_string(),
                name: name.to_string(),
            }),
            Role::Patient => self.patients.push(Patient {
                id: id.to_string(),
                name: name.to_string(),
                consent: Vec::new(),
            }),
            Role::Admin => self.admins.push(User {
                id: id.to_string(),
                name: name.to_string(),
            }),
        }

        Ok(())
    }

    /// Looks up the role of a registered id
    pub fn role_of(&self, id: &str) -> Option<Role> {
        if self.is_doctor(id) {
            Some(Role::Doctor)
        } else if self.is_patient(id) {
            Some(Role::Patient)
        } else if self.is_admin(id) {
            Some(Role::Admin)
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.role_of(id).is_some()
    }

    pub fn is_doctor(&self, id: &str) -> bool {
        self.doctors.iter().any(|u| u.id == id)
    }

    pub fn is_patient(&self, id: &str) -> bool {
        self.patients.iter().any(|p| p.id == id)
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.iter().any(|u| u.id == id)
    }

    /// Cardinality of the doctor bucket, snapshotted into block headers
    pub fn doctor_count(&self) -> u64 {
        self.doctors.len() as u64
    }

    pub fn doctors(&self) -> &[User] {
        &self.doctors
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn admins(&self) -> &[User] {
        &self.admins
    }

    /// All registered ids across the three role buckets
    pub fn all_ids(&self) -> Vec<String> {
        self.doctors
            .iter()
            .map(|u| u.id.clone())
            .chain(self.patients.iter().map(|p| p.id.clone()))
            .chain(self.admins.iter().map(|u| u.id.clone()))
            .collect()
    }

    /// Grants a patient's consent to a doctor
    pub fn grant_consent(&mut self, patient_id: &str, doctor_id: &str) -> Result<(), ValidationError> {
        if !self.is_doctor(doctor_id) {
            return Err(ValidationError::NotADoctor(doctor_id.to_string()));
        }
        let patient = self
            .patients
            .iter_mut()
            .find(|p| p.id == patient_id)
            .ok_or_else(|| ValidationError::NotAPatient(patient_id.to_string()))?;

        if patient.consent.iter().any(|d| d == doctor_id) {
            return Err(ValidationError::DuplicateConsent(doctor_id.to_string()));
        }

        patient.consent.push(doctor_id.to_string());
        Ok(())
    }

    /// Revokes a patient's consent to a doctor
    pub fn revoke_consent(&mut self, patient_id: &str, doctor_id: &str) -> Result<(), ValidationError> {
        let patient = self
            .patients
            .iter_mut()
            .find(|p| p.id == patient_id)
            .ok_or_else(|| ValidationError::NotAPatient(patient_id.to_string()))?;

        let before = patient.consent.len();
        patient.consent.retain(|d| d != doctor_id);
        if patient.consent.len() == before {
            return Err(ValidationError::MissingConsent(doctor_id.to_string()));
        }

        Ok(())
    }

    /// Checks whether a patient has granted consent to a doctor
    pub fn has_consent(&self, patient_id: &str, doctor_id: &str) -> bool {
        self.patients
            .iter()
            .find(|p| p.id == patient_id)
            .map(|p| p.consent.iter().any(|d| d == doctor_id))
            .unwrap_or(false)
    }
}
