use anyhow::Result;
use helios_voice::attachment::{mime_type_for, Attachment, MAX_ATTACHMENT_BYTES};
use helios_voice::transport::Part;
use std::path::Path;

#[test]
fn test_load_image_attachment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Photo.JPG");
    std::fs::write(&path, [0xff, 0xd8, 0xff, 0xe0])?;

    let attachment = Attachment::load(&path)?;
    assert_eq!(attachment.name, "Photo.JPG");
    assert_eq!(attachment.mime_type, "image/jpeg");
    assert_eq!(attachment.data, "/9j/4A==");
    assert_eq!(attachment.decoded_len(), 4);

    match attachment.into_part() {
        Part::InlineBinary(binary) => assert_eq!(binary.mime_type, "image/jpeg"),
        other => panic!("unexpected part: {:?}", other),
    }
    Ok(())
}

#[test]
fn test_unsupported_type_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello")?;

    assert!(Attachment::load(&path).is_err());
    assert_eq!(mime_type_for(Path::new("report.pdf")), Some("application/pdf"));
    assert_eq!(mime_type_for(Path::new("archive")), None);
    Ok(())
}

#[test]
fn test_oversized_attachment_is_rejected() {
    let bytes = vec![0u8; MAX_ATTACHMENT_BYTES + 1];
    let attachment = Attachment::from_bytes("huge.png", "image/png", &bytes);
    assert!(attachment.validate().is_err());

    let bytes = vec![0u8; 1024];
    let attachment = Attachment::from_bytes("small.png", "image/png", &bytes);
    assert!(attachment.validate().is_ok());
    assert_eq!(attachment.decoded_len(), 1024);
}

#[test]
fn test_validate_checks_declared_type() {
    let attachment = Attachment::from_bytes("clip.mp3", "audio/mpeg", &[1, 2, 3]);
    assert!(attachment.validate().is_err());
}

#[test]
fn test_invalid_base64_is_rejected() {
    let attachment = Attachment {
        name: "scan.png".to_string(),
        mime_type: "image/png".to_string(),
        data: "not*base64!".to_string(),
    };
    let err = attachment.validate().unwrap_err();
    assert!(err.to_string().contains("not valid base64"));
}

#[test]
fn test_oversized_file_is_rejected_before_reading() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("poster.png");
    let file = std::fs::File::create(&path)?;
    file.set_len(MAX_ATTACHMENT_BYTES as u64 + 1)?;

    let err = Attachment::load(&path).unwrap_err();
    assert!(err.to_string().contains("limit"));
    Ok(())
}
