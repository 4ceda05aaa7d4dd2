//! Algorithm suites: the algorithms and key sizes a message may use.

use crate::constants::{
    ALG_AES128, ALG_AES128_GCM, ALG_AES192, ALG_AES256, ALG_AES256_GCM, ALG_EXC_C14N,
    ALG_HMAC_SHA1, ALG_HMAC_SHA256, ALG_KEYTRANSPORT_RSA15, ALG_KEYTRANSPORT_RSAOAEP,
    ALG_KEYTRANSPORT_RSAOAEP_XENC11, ALG_RSA_SHA1, ALG_RSA_SHA256, ALG_SHA1, ALG_SHA256,
    ALG_TRIPLE_DES,
};
use crate::error::{WssError, WssResult};

/// Allowed algorithms and key sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmSuite {
    pub name: String,
    pub digest: String,
    pub encryption: String,
    pub key_wrap: Vec<String>,
    pub symmetric_signature: String,
    pub asymmetric_signature: String,
    pub canonicalization: String,
    pub min_asymmetric_key_bits: usize,
    pub max_asymmetric_key_bits: usize,
}

impl AlgorithmSuite {
    /// Suite by its WS-SecurityPolicy name, e.g. `Basic256Sha256`.
    pub fn named(name: &str) -> Option<Self> {
        let (base, rsa15, sha256) = match name {
            "Basic256" => ("Basic256", false, false),
            "Basic192" => ("Basic192", false, false),
            "Basic128" => ("Basic128", false, false),
            "TripleDes" => ("TripleDes", false, false),
            "Basic256Rsa15" => ("Basic256", true, false),
            "Basic192Rsa15" => ("Basic192", true, false),
            "Basic128Rsa15" => ("Basic128", true, false),
            "TripleDesRsa15" => ("TripleDes", true, false),
            "Basic256Sha256" => ("Basic256", false, true),
            "Basic192Sha256" => ("Basic192", false, true),
            "Basic128Sha256" => ("Basic128", false, true),
            "TripleDesSha256" => ("TripleDes", false, true),
            "Basic256Sha256Rsa15" => ("Basic256", true, true),
            "Basic192Sha256Rsa15" => ("Basic192", true, true),
            "Basic128Sha256Rsa15" => ("Basic128", true, true),
            "TripleDesSha256Rsa15" => ("TripleDes", true, true),
            _ => return None,
        };
        let encryption = match base {
            "Basic256" => ALG_AES256,
            "Basic192" => ALG_AES192,
            "Basic128" => ALG_AES128,
            _ => ALG_TRIPLE_DES,
        };
        let key_wrap = if rsa15 {
            vec![ALG_KEYTRANSPORT_RSA15.to_string()]
        } else {
            vec![
                ALG_KEYTRANSPORT_RSAOAEP.to_string(),
                ALG_KEYTRANSPORT_RSAOAEP_XENC11.to_string(),
            ]
        };
        Some(Self {
            name: name.to_string(),
            digest: if sha256 { ALG_SHA256 } else { ALG_SHA1 }.to_string(),
            encryption: encryption.to_string(),
            key_wrap,
            symmetric_signature: if sha256 { ALG_HMAC_SHA256 } else { ALG_HMAC_SHA1 }.to_string(),
            asymmetric_signature: if sha256 { ALG_RSA_SHA256 } else { ALG_RSA_SHA1 }.to_string(),
            canonicalization: ALG_EXC_C14N.to_string(),
            min_asymmetric_key_bits: 1024,
            max_asymmetric_key_bits: 4096,
        })
    }

    fn violation(&self, what: &str, algorithm: &str) -> WssError {
        WssError::invalid_security(format!(
            "The {} algorithm {} does not match the algorithm suite {}",
            what, algorithm, self.name
        ))
    }

    pub fn allows_key_wrap(&self, algorithm: &str) -> bool {
        self.key_wrap.iter().any(|a| a == algorithm)
    }

    pub fn check_key_wrap(&self, algorithm: &str) -> WssResult<()> {
        if self.allows_key_wrap(algorithm) {
            Ok(())
        } else {
            Err(self.violation("key wrap", algorithm))
        }
    }

    /// The suite's cipher, or its GCM counterpart of the same key size.
    pub fn check_symmetric_encryption(&self, algorithm: &str) -> WssResult<()> {
        let gcm_counterpart = match self.encryption.as_str() {
            ALG_AES128 => Some(ALG_AES128_GCM),
            ALG_AES256 => Some(ALG_AES256_GCM),
            _ => None,
        };
        if algorithm == self.encryption || gcm_counterpart == Some(algorithm) {
            Ok(())
        } else {
            Err(self.violation("encryption", algorithm))
        }
    }

    pub fn check_signature(&self, algorithm: &str) -> WssResult<()> {
        if algorithm == self.asymmetric_signature || algorithm == self.symmetric_signature {
            Ok(())
        } else {
            Err(self.violation("signature", algorithm))
        }
    }

    pub fn check_digest(&self, algorithm: &str) -> WssResult<()> {
        if algorithm == self.digest {
            Ok(())
        } else {
            Err(self.violation("digest", algorithm))
        }
    }

    pub fn check_canonicalization(&self, algorithm: &str) -> WssResult<()> {
        if algorithm == self.canonicalization {
            Ok(())
        } else {
            Err(self.violation("canonicalization", algorithm))
        }
    }

    pub fn check_asymmetric_key_length(&self, bits: usize) -> WssResult<()> {
        if bits < self.min_asymmetric_key_bits || bits > self.max_asymmetric_key_bits {
            return Err(WssError::invalid_security(format!(
                "The asymmetric key length {} does not match the algorithm suite {}",
                bits, self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_suites() {
        let suite = AlgorithmSuite::named("Basic256Sha256").unwrap();
        assert_eq!(suite.encryption, ALG_AES256);
        assert_eq!(suite.digest, ALG_SHA256);
        assert!(suite.check_signature(ALG_RSA_SHA256).is_ok());
        assert!(suite.check_signature(ALG_RSA_SHA1).is_err());
        assert!(AlgorithmSuite::named("Basic512").is_none());
    }

    #[test]
    fn test_rsa15_only_in_rsa15_suites() {
        assert!(AlgorithmSuite::named("Basic128")
            .unwrap()
            .check_key_wrap(ALG_KEYTRANSPORT_RSA15)
            .is_err());
        assert!(AlgorithmSuite::named("Basic128Rsa15")
            .unwrap()
            .check_key_wrap(ALG_KEYTRANSPORT_RSA15)
            .is_ok());
    }

    #[test]
    fn test_gcm_counterpart_accepted() {
        let suite = AlgorithmSuite::named("Basic128").unwrap();
        assert!(suite.check_symmetric_encryption(ALG_AES128_GCM).is_ok());
        assert!(suite.check_symmetric_encryption(ALG_AES256).is_err());
    }

    #[test]
    fn test_key_length_bounds() {
        let suite = AlgorithmSuite::named("Basic256").unwrap();
        assert!(suite.check_asymmetric_key_length(512).is_err());
        assert!(suite.check_asymmetric_key_length(2048).is_ok());
    }
}
