use serde::{Deserialize, Serialize};

/// Case the exercise opens in the viewer frame. Fields still holding an
/// unreplaced `{{...}}` placeholder are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchContext {
    pub case_url: String,
    pub patient_id: Option<String>,
    pub structure_name: Option<String>,
}

fn is_placeholder(value: &str) -> bool {
    value.contains("{{")
}

impl LaunchContext {
    pub fn new(case_url: impl Into<String>) -> Self {
        Self {
            case_url: case_url.into(),
            ..Self::default()
        }
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_structure(mut self, structure_name: impl Into<String>) -> Self {
        self.structure_name = Some(structure_name.into());
        self
    }

    /// Case URL with `patientId` and `structure` appended.
    pub fn viewer_url(&self) -> String {
        let mut url = self.case_url.clone();
        let params = [
            ("patientId", self.patient_id.as_deref()),
            ("structure", self.structure_name.as_deref()),
        ];
        for (name, value) in params {
            let value = match value {
                Some(value) if !value.is_empty() && !is_placeholder(value) => value,
                _ => continue,
            };
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push(separator);
            url.push_str(name);
            url.push('=');
            url.push_str(&encode_component(value));
        }
        url
    }
}

/// Percent-encodes everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
