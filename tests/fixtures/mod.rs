#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use docseal::config::Config;
use docseal::types::{IdentityClaim, RequestHeaders};
use filetime::FileTime;

pub const SECRET: &str = "integration-test-secret-0123456789";
pub const BROWSER: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub struct TestFixtures;

impl TestFixtures {
    /// Single page with a font resource and a text object
    pub fn get_text_pdf() -> Vec<u8> {
        b"%PDF-1.4
1 0 obj
<<
/Type /Catalog
/Pages 2 0 R
>>
endobj

2 0 obj
<<
/Type /Pages
/Kids [3 0 R]
/Count 1
>>
endobj

3 0 obj
<<
/Type /Page
/Parent 2 0 R
/MediaBox [0 0 612 792]
/Resources << /Font << /F1 5 0 R >> >>
/Contents 4 0 R
>>
endobj

4 0 obj
<< /Length 44 >>
stream
BT /F1 12 Tf 72 712 Td (Oficio 112) Tj ET
endstream
endobj

5 0 obj
<<
/Type /Font
/Subtype /Type1
/BaseFont /Helvetica
>>
endobj

6 0 obj
<<
/Title (Oficio 112)
/Author (Departamento Pessoal)
/CreationDate (D:20240105093000Z)
>>
endobj

trailer
<<
/Size 7
/Root 1 0 R
/Info 6 0 R
>>
%%EOF"
            .to_vec()
    }

    /// Scanned page: one image and no text operators
    pub fn get_image_only_pdf() -> Vec<u8> {
        b"%PDF-1.4
1 0 obj
<<
/Type /XObject
/Subtype /Image
/Width 2480
/Height 3508
/ColorSpace /DeviceRGB
/BitsPerComponent 16
>>
endobj
%%EOF"
            .to_vec()
    }

    /// Text PDF whose producer is a screen capture tool
    pub fn get_capture_tool_pdf() -> Vec<u8> {
        let mut pdf = Self::get_text_pdf();
        let marker = b"/Producer (Snipping Tool)\n";
        let at = pdf.len() - b"%%EOF".len();
        pdf.splice(at..at, marker.iter().copied());
        pdf
    }

    /// Text PDF carrying a full-HD screenshot image
    pub fn get_screenshot_pdf() -> Vec<u8> {
        let mut pdf = Self::get_text_pdf();
        let image = b"7 0 obj << /Type /XObject /Subtype /Image /Width 1920 /Height 1080 /BitsPerComponent 8 >> endobj\n";
        let at = pdf.len() - b"%%EOF".len();
        pdf.splice(at..at, image.iter().copied());
        pdf
    }

    pub fn get_malformed_pdf() -> Vec<u8> {
        b"This is not a valid PDF file".to_vec()
    }
}

pub fn config() -> Config {
    Config::with_secret(SECRET)
}

pub fn identity() -> IdentityClaim {
    IdentityClaim::new("Joana Prado", "52998224725", "20871")
        .with_role("Assistente Administrativo", "Secretaria de Saúde")
        .with_entity("prefeitura-exemplo")
}

pub fn browser_headers(ip: &str) -> RequestHeaders {
    RequestHeaders::new(ip, Some(BROWSER)).with_session("sess-1")
}

/// Writes `content` to `dir/name` with an mtime `age` in the past
pub fn write_aged(dir: &Path, name: &str, content: &[u8], age: Duration) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    let mtime = FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_file_mtime(&path, mtime).unwrap();
    path
}
