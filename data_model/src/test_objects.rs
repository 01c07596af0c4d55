pub mod tests {
    use chrono::Utc;

    use crate::{
        DescriptorDefaults,
        DocumentDescriptor,
        OwnerId,
        SubmittedMetadata,
        UploadedBlob,
    };

    pub const TEST_PUBLIC_BASE: &str = "http://localhost:5000";

    pub fn mock_blob(original_name: &str, size_bytes: u64) -> UploadedBlob {
        let (base, ext) = match original_name.rsplit_once('.') {
            Some((base, ext)) => (base, format!(".{}", ext)),
            None => (original_name, String::new()),
        };
        UploadedBlob {
            storage_name: format!("{}-1718000000000-123456789{}", base, ext),
            original_name: original_name.to_string(),
            size_bytes,
            extension: ext.trim_start_matches('.').to_uppercase(),
            stored_at: Utc::now(),
        }
    }

    pub fn mock_descriptor(original_name: &str, owner: OwnerId) -> DocumentDescriptor {
        let blob = mock_blob(original_name, 128);
        let url = format!("{}/documents/{}", TEST_PUBLIC_BASE, blob.storage_name);
        DocumentDescriptor::from_upload(
            &blob,
            url,
            &SubmittedMetadata {
                user_id: Some(owner),
                ..Default::default()
            },
            &DescriptorDefaults::default(),
        )
    }
}
