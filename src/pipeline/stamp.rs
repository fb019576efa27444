//! Text handed to the external stamping layer

use rand::Rng;

use crate::types::IdentityClaim;

const VERIFY_HINT: &str = "APONTE SUA CAMARA PARA O QRCODE PARA VERIFICAR AUTENTICIDADE.";

/// `NNL-NNL-NNL`: two digits in 10..=99 followed by an uppercase letter
pub fn verification_code() -> String {
    let mut rng = rand::thread_rng();
    (0..3)
        .map(|_| {
            let digits: u8 = rng.gen_range(10..=99);
            let letter = char::from(rng.gen_range(b'A'..=b'Z'));
            format!("{}{}", digits, letter)
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// `000.000.000-00` for 11 digits, `00.000.000/0000-00` for 14, otherwise
/// the digits unchanged
pub fn format_cpf(value: &str) -> String {
    let d: String = value.chars().filter(char::is_ascii_digit).collect();
    match d.len() {
        11 => format!("{}.{}.{}-{}", &d[..3], &d[3..6], &d[6..9], &d[9..]),
        14 => format!("{}.{}.{}/{}-{}", &d[..2], &d[2..5], &d[5..8], &d[8..12], &d[12..]),
        _ => d,
    }
}

/// Upper-cased, accents folded to ASCII, punctuation dropped
pub fn plain_upper(value: &str) -> String {
    let folded: String = value
        .chars()
        .filter_map(|c| match fold_accent(c) {
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c),
            _ => None,
        })
        .collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ã' | 'â' | 'ä' => 'a',
        'Á' | 'À' | 'Ã' | 'Â' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'õ' | 'ô' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Õ' | 'Ô' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        other => other,
    }
}

pub fn stamp_lines(identity: &IdentityClaim, code: &str, signed_at: &str) -> Vec<String> {
    vec![
        format!(
            "DOCUMENTO ASSINADO DIGITALMENTE. CODIGO {} - DATA DA ASSINATURA: {}",
            code, signed_at
        ),
        format!(
            "{} CPF: {} MATRICULA: {}",
            identity.name.to_uppercase(),
            format_cpf(&identity.cpf),
            identity.employee_id
        ),
        format!(
            "CARGO: {} ORGAO:{}",
            identity.role.to_uppercase(),
            plain_upper(&identity.department)
        ),
        VERIFY_HINT.to_string(),
    ]
}

pub fn qr_payload_url(base: &str, entity: &str, token: &str, zk_token: &str) -> String {
    format!(
        "{}/{}/services/signature/confirmation-signature?token={}&zk={}",
        base.trim_end_matches('/'),
        urlencoding::encode(entity),
        urlencoding::encode(token),
        urlencoding::encode(zk_token)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_verification_code_shape() {
        let shape = Regex::new(r"^[1-9][0-9][A-Z]-[1-9][0-9][A-Z]-[1-9][0-9][A-Z]$").unwrap();
        for _ in 0..200 {
            let code = verification_code();
            assert!(shape.is_match(&code), "bad code {}", code);
        }
    }

    #[test]
    fn test_format_cpf() {
        assert_eq!(format_cpf("12345678901"), "123.456.789-01");
        assert_eq!(format_cpf("123.456.789-01"), "123.456.789-01");
        assert_eq!(format_cpf("12345678000195"), "12.345.678/0001-95");
        assert_eq!(format_cpf("1234"), "1234");
    }

    #[test]
    fn test_plain_upper() {
        assert_eq!(plain_upper("Secretaria de Educação (SEDUC)."), "SECRETARIA DE EDUCACAO SEDUC");
        assert_eq!(plain_upper("  saúde  "), "SAUDE");
    }

    #[test]
    fn test_stamp_lines() {
        let identity = IdentityClaim::new("Ana Souza", "12345678901", "4471")
            .with_role("Analista", "Secretaria de Saúde");
        let lines = stamp_lines(&identity, "12A-34B-56C", "01/03/2026 09:30:00");
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "DOCUMENTO ASSINADO DIGITALMENTE. CODIGO 12A-34B-56C - DATA DA ASSINATURA: 01/03/2026 09:30:00"
        );
        assert_eq!(lines[1], "ANA SOUZA CPF: 123.456.789-01 MATRICULA: 4471");
        assert_eq!(lines[2], "CARGO: ANALISTA ORGAO:SECRETARIA DE SAUDE");
    }

    #[test]
    fn test_qr_payload_url() {
        assert_eq!(
            qr_payload_url("http://sign.local/", "prefeitura", "tk_ab", "zk_cd"),
            "http://sign.local/prefeitura/services/signature/confirmation-signature?token=tk_ab&zk=zk_cd"
        );
    }
}
