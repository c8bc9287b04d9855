use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const STUDENT_QR_TYPE: &str = "student_identification";

/// Content encoded into a student's identification QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentQrPayload {
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub section: String,
    #[serde(default)]
    pub adviser: Option<String>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
}

impl StudentQrPayload {
    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QrSource {
    Json,
    Text,
    IdOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedStudentQr {
    pub student_no: String,
    pub student_name: Option<String>,
    pub grade: Option<String>,
    pub section: Option<String>,
    pub source: QrSource,
}

#[derive(Deserialize)]
struct LooseQrJson {
    student_id: Option<serde_json::Value>,
    student_name: Option<String>,
    grade: Option<serde_json::Value>,
    section: Option<String>,
}

fn json_scalar(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// Accepts the JSON payload, the `STUDENT:<id>:<name>` text form, or a bare
/// alphanumeric student number.
pub fn parse_student_qr(content: &str) -> anyhow::Result<ParsedStudentQr> {
    let t = content.trim();
    if t.is_empty() {
        return Err(anyhow!("empty QR content"));
    }

    if let Ok(v) = serde_json::from_str::<LooseQrJson>(t) {
        let student_no = v.student_id.as_ref().and_then(json_scalar);
        let student_name = v.student_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let (Some(student_no), Some(student_name)) = (student_no, student_name) {
            return Ok(ParsedStudentQr {
                student_no,
                student_name: Some(student_name),
                grade: v.grade.as_ref().and_then(json_scalar),
                section: v.section,
                source: QrSource::Json,
            });
        }
    }

    if let Some(rest) = t.strip_prefix("STUDENT:") {
        let mut parts = rest.splitn(2, ':');
        let id = parts.next().unwrap_or("").trim();
        let name = parts.next().map(str::trim).filter(|s| !s.is_empty());
        if !id.is_empty() {
            return Ok(ParsedStudentQr {
                student_no: id.to_string(),
                student_name: Some(name.unwrap_or("Unknown Student").to_string()),
                grade: None,
                section: None,
                source: QrSource::Text,
            });
        }
    }

    if t.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(ParsedStudentQr {
            student_no: t.to_string(),
            student_name: None,
            grade: None,
            section: None,
            source: QrSource::IdOnly,
        });
    }

    let preview: String = t.chars().take(50).collect();
    Err(anyhow!("invalid QR code format: {}", preview))
}

/// Detects the image type from its leading bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="128" height="128" viewBox="0 0 24 24">
  <rect width="24" height="24" fill="#f3f4f6"/>
  <text x="50%" y="50%" dominant-baseline="middle" text-anchor="middle" font-family="monospace" font-size="8" fill="#9ca3af">No QR Code</text>
</svg>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_payload_parses_back_as_json_source() {
        let payload = StudentQrPayload {
            student_id: "101113130039".into(),
            student_name: "Ana Reyes".into(),
            grade: "7".into(),
            section: "Bernoulli".into(),
            adviser: None,
            id: "uuid-1".into(),
            kind: STUDENT_QR_TYPE.into(),
            timestamp: "2025-03-01T00:00:00Z".into(),
        };
        let text = payload.encode().expect("encode");
        assert!(text.contains("\"type\":\"student_identification\""));
        let parsed = parse_student_qr(&text).expect("parse");
        assert_eq!(parsed.source, QrSource::Json);
        assert_eq!(parsed.student_no, "101113130039");
        assert_eq!(parsed.section.as_deref(), Some("Bernoulli"));
    }

    #[test]
    fn text_and_id_forms_are_accepted() {
        let t = parse_student_qr("STUDENT:A100:Ben Cruz").expect("text");
        assert_eq!(t.source, QrSource::Text);
        assert_eq!(t.student_no, "A100");
        assert_eq!(t.student_name.as_deref(), Some("Ben Cruz"));

        let t = parse_student_qr("STUDENT:A100").expect("text without name");
        assert_eq!(t.student_name.as_deref(), Some("Unknown Student"));

        let id = parse_student_qr(" 20250017 ").expect("id");
        assert_eq!(id.source, QrSource::IdOnly);
        assert_eq!(id.student_no, "20250017");
    }

    #[test]
    fn json_without_name_falls_through_and_garbage_is_rejected() {
        assert!(parse_student_qr(r#"{"student_id":"A1"}"#).is_err());
        assert!(parse_student_qr("hello world!").is_err());
        assert!(parse_student_qr("   ").is_err());
    }

    #[test]
    fn sniffs_common_image_signatures() {
        assert_eq!(
            sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some("image/png")
        );
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_mime(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(b"%PDF-1.7"), None);
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
