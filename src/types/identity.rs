use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::mask_cpf;

/// Identity claimed by the signer or by a verifier
///
/// Field aliases accept the payload keys produced by the upload front end.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    #[serde(alias = "nome")]
    pub name: String,
    pub cpf: String,
    #[serde(alias = "cargo", default)]
    pub role: String,
    #[serde(alias = "secretaria", default)]
    pub department: String,
    #[serde(alias = "matricula")]
    pub employee_id: String,
    #[serde(alias = "entidade", default)]
    pub entity: Option<String>,
    #[serde(alias = "senha", default, skip_serializing)]
    pub password: Option<String>,
}

impl IdentityClaim {
    pub fn new(name: &str, cpf: &str, employee_id: &str) -> Self {
        Self {
            name: name.to_string(),
            cpf: cpf.to_string(),
            role: String::new(),
            department: String::new(),
            employee_id: employee_id.to_string(),
            entity: None,
            password: None,
        }
    }

    pub fn with_role(mut self, role: &str, department: &str) -> Self {
        self.role = role.to_string();
        self.department = department.to_string();
        self
    }

    pub fn with_entity(mut self, entity: &str) -> Self {
        self.entity = Some(entity.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// The subset of the claim that is bound into HMAC bindings
    pub fn bound(&self) -> BoundIdentity {
        BoundIdentity {
            employee_id: self.employee_id.clone(),
            cpf: self.cpf.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for IdentityClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityClaim")
            .field("employee_id", &self.employee_id)
            .field("cpf", &mask_cpf(&self.cpf))
            .field("entity", &self.entity)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Identity fields covered by a cryptographic binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundIdentity {
    pub employee_id: String,
    pub cpf: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_end_aliases() {
        let json = r#"{"nome":"Maria","cpf":"12345678901","cargo":"Analista",
            "secretaria":"Saúde","matricula":"4471","entidade":"prefeitura"}"#;
        let claim: IdentityClaim = serde_json::from_str(json).unwrap();
        assert_eq!(claim.name, "Maria");
        assert_eq!(claim.employee_id, "4471");
        assert_eq!(claim.department, "Saúde");
        assert_eq!(claim.entity.as_deref(), Some("prefeitura"));
        assert!(claim.password.is_none());
    }

    #[test]
    fn test_debug_masks_sensitive_fields() {
        let claim = IdentityClaim::new("Maria", "12345678901", "4471").with_password("hunter2");
        let rendered = format!("{:?}", claim);
        assert!(!rendered.contains("12345678901"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_password_never_serialized() {
        let claim = IdentityClaim::new("Maria", "12345678901", "4471").with_password("hunter2");
        assert!(!serde_json::to_string(&claim).unwrap().contains("hunter2"));
    }
}
