mod fixtures;

use chrono::{Duration, Utc};
use docseal::encryption::{decrypt_identity_payload, encrypt_identity_payload};
use docseal::error::Error;
use docseal::forensics::{SuspicionTag, Verdict};
use docseal::pipeline::SealingService;
use docseal::types::DocumentSource;
use fixtures::*;

fn aged(content: Vec<u8>) -> DocumentSource {
    DocumentSource::from_bytes(content, "oficio_112.pdf", Utc::now() - Duration::hours(3))
}

#[test]
fn test_inspect_clean_document() {
    let service = SealingService::new(config()).unwrap();
    let inspection = service.inspect(&aged(TestFixtures::get_text_pdf())).unwrap();

    assert!(inspection.intake.has_text);
    assert!(!inspection.intake.has_images);
    assert!(inspection.intake.conversion_tool.is_none());
    assert!(inspection.assessment.tags.is_empty());
    assert_eq!(inspection.assessment.verdict, Verdict::Clean);
}

#[test]
fn test_inspect_screenshot_document() {
    let service = SealingService::new(config()).unwrap();
    let inspection = service.inspect(&aged(TestFixtures::get_screenshot_pdf())).unwrap();
    let tags = &inspection.assessment.tags;

    assert!(tags.contains(&SuspicionTag::ScreenResolutionMatch));
    assert!(tags.contains(&SuspicionTag::LowQualityImage));
    assert!(tags.contains(&SuspicionTag::ImageHeavyPdf));
    assert!(!tags.contains(&SuspicionTag::RecentCreationTimestamp));
    assert_eq!(inspection.assessment.verdict, Verdict::Reject);
}

#[test]
fn test_inspect_has_no_side_effects() {
    let service = SealingService::new(config()).unwrap();
    service.inspect(&aged(TestFixtures::get_capture_tool_pdf())).unwrap();

    assert!(service.store().table().is_empty());
    assert!(service.devices().table().is_empty());
}

#[test]
fn test_inspect_surfaces_intake_errors() {
    let service = SealingService::new(config()).unwrap();
    let result = service.inspect(&aged(TestFixtures::get_malformed_pdf()));
    assert!(matches!(result, Err(Error::ValidationError(_))));
}

#[test]
fn test_encrypted_identity_payload_with_front_end_keys() {
    let json = r#"{
        "nome": "Joana Prado",
        "cpf": "52998224725",
        "cargo": "Assistente Administrativo",
        "secretaria": "Secretaria de Saúde",
        "matricula": "20871",
        "entidade": "prefeitura-exemplo"
    }"#
    .as_bytes();
    let payload = encrypt_identity_payload(json, b"front-end-passphrase").unwrap();

    let claim = decrypt_identity_payload(&payload, b"front-end-passphrase").unwrap();
    assert_eq!(claim, identity());

    assert!(decrypt_identity_payload(&payload, b"wrong-passphrase").is_err());
    assert!(matches!(
        decrypt_identity_payload(&payload[..20], b"front-end-passphrase"),
        Err(Error::ValidationError(_))
    ));
}
