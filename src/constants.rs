//! Namespaces, element names and algorithm identifiers.

use crate::xml::QName;

pub const NS_SOAP11: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const NS_SOAP12: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_WSSE10: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const NS_WSSE11: &str = "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd";
pub const NS_WSU10: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const NS_XENC: &str = "http://www.w3.org/2001/04/xmlenc#";
pub const NS_XENC11: &str = "http://www.w3.org/2009/xmlenc11#";
pub const NS_WSC_0502: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc";
pub const NS_WSC_13: &str = "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512";
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

pub const NS_WSP_2004: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";
pub const NS_WSP_15: &str = "http://www.w3.org/ns/ws-policy";
pub const NS_SP_11: &str = "http://schemas.xmlsoap.org/ws/2005/07/securitypolicy";
pub const NS_SP_12: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702";
pub const NS_SP_13: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200802";

pub const PREFIX_WSSE: &str = "wsse";
pub const PREFIX_WSSE11: &str = "wsse11";
pub const PREFIX_WSU: &str = "wsu";
pub const PREFIX_DSIG: &str = "ds";
pub const PREFIX_XENC: &str = "xenc";
pub const PREFIX_WSC: &str = "wsc";

// SOAP structure
pub const TAG_SOAP11_ENVELOPE: QName = QName::constant(NS_SOAP11, "Envelope", "soap");
pub const TAG_SOAP11_HEADER: QName = QName::constant(NS_SOAP11, "Header", "soap");
pub const TAG_SOAP11_BODY: QName = QName::constant(NS_SOAP11, "Body", "soap");
pub const TAG_SOAP12_ENVELOPE: QName = QName::constant(NS_SOAP12, "Envelope", "soap");
pub const TAG_SOAP12_HEADER: QName = QName::constant(NS_SOAP12, "Header", "soap");
pub const TAG_SOAP12_BODY: QName = QName::constant(NS_SOAP12, "Body", "soap");

// WS-Security
pub const TAG_WSSE_SECURITY: QName = QName::constant(NS_WSSE10, "Security", PREFIX_WSSE);
pub const TAG_WSSE_BINARY_SECURITY_TOKEN: QName =
    QName::constant(NS_WSSE10, "BinarySecurityToken", PREFIX_WSSE);
pub const TAG_WSSE_USERNAME_TOKEN: QName = QName::constant(NS_WSSE10, "UsernameToken", PREFIX_WSSE);
pub const TAG_WSSE_USERNAME: QName = QName::constant(NS_WSSE10, "Username", PREFIX_WSSE);
pub const TAG_WSSE_PASSWORD: QName = QName::constant(NS_WSSE10, "Password", PREFIX_WSSE);
pub const TAG_WSSE_NONCE: QName = QName::constant(NS_WSSE10, "Nonce", PREFIX_WSSE);
pub const TAG_WSSE11_SALT: QName = QName::constant(NS_WSSE11, "Salt", PREFIX_WSSE11);
pub const TAG_WSSE11_ITERATION: QName = QName::constant(NS_WSSE11, "Iteration", PREFIX_WSSE11);
pub const TAG_WSSE_SECURITY_TOKEN_REFERENCE: QName =
    QName::constant(NS_WSSE10, "SecurityTokenReference", PREFIX_WSSE);
pub const TAG_WSSE_REFERENCE: QName = QName::constant(NS_WSSE10, "Reference", PREFIX_WSSE);
pub const TAG_WSSE_KEY_IDENTIFIER: QName = QName::constant(NS_WSSE10, "KeyIdentifier", PREFIX_WSSE);
pub const TAG_WSSE_EMBEDDED: QName = QName::constant(NS_WSSE10, "Embedded", PREFIX_WSSE);
pub const TAG_WSSE11_SIGNATURE_CONFIRMATION: QName =
    QName::constant(NS_WSSE11, "SignatureConfirmation", PREFIX_WSSE11);

pub const TAG_WSU_TIMESTAMP: QName = QName::constant(NS_WSU10, "Timestamp", PREFIX_WSU);
pub const TAG_WSU_CREATED: QName = QName::constant(NS_WSU10, "Created", PREFIX_WSU);
pub const TAG_WSU_EXPIRES: QName = QName::constant(NS_WSU10, "Expires", PREFIX_WSU);

// XML Signature
pub const TAG_DSIG_SIGNATURE: QName = QName::constant(NS_DSIG, "Signature", PREFIX_DSIG);
pub const TAG_DSIG_SIGNED_INFO: QName = QName::constant(NS_DSIG, "SignedInfo", PREFIX_DSIG);
pub const TAG_DSIG_CANONICALIZATION_METHOD: QName =
    QName::constant(NS_DSIG, "CanonicalizationMethod", PREFIX_DSIG);
pub const TAG_DSIG_SIGNATURE_METHOD: QName = QName::constant(NS_DSIG, "SignatureMethod", PREFIX_DSIG);
pub const TAG_DSIG_REFERENCE: QName = QName::constant(NS_DSIG, "Reference", PREFIX_DSIG);
pub const TAG_DSIG_TRANSFORMS: QName = QName::constant(NS_DSIG, "Transforms", PREFIX_DSIG);
pub const TAG_DSIG_TRANSFORM: QName = QName::constant(NS_DSIG, "Transform", PREFIX_DSIG);
pub const TAG_DSIG_DIGEST_METHOD: QName = QName::constant(NS_DSIG, "DigestMethod", PREFIX_DSIG);
pub const TAG_DSIG_DIGEST_VALUE: QName = QName::constant(NS_DSIG, "DigestValue", PREFIX_DSIG);
pub const TAG_DSIG_SIGNATURE_VALUE: QName = QName::constant(NS_DSIG, "SignatureValue", PREFIX_DSIG);
pub const TAG_DSIG_KEY_INFO: QName = QName::constant(NS_DSIG, "KeyInfo", PREFIX_DSIG);
pub const TAG_DSIG_X509_DATA: QName = QName::constant(NS_DSIG, "X509Data", PREFIX_DSIG);
pub const TAG_DSIG_X509_ISSUER_SERIAL: QName =
    QName::constant(NS_DSIG, "X509IssuerSerial", PREFIX_DSIG);
pub const TAG_DSIG_X509_ISSUER_NAME: QName = QName::constant(NS_DSIG, "X509IssuerName", PREFIX_DSIG);
pub const TAG_DSIG_X509_SERIAL_NUMBER: QName =
    QName::constant(NS_DSIG, "X509SerialNumber", PREFIX_DSIG);
pub const TAG_DSIG_X509_CERTIFICATE: QName = QName::constant(NS_DSIG, "X509Certificate", PREFIX_DSIG);

// XML Encryption
pub const TAG_XENC_ENCRYPTED_KEY: QName = QName::constant(NS_XENC, "EncryptedKey", PREFIX_XENC);
pub const TAG_XENC_ENCRYPTED_DATA: QName = QName::constant(NS_XENC, "EncryptedData", PREFIX_XENC);
pub const TAG_XENC_ENCRYPTION_METHOD: QName =
    QName::constant(NS_XENC, "EncryptionMethod", PREFIX_XENC);
pub const TAG_XENC_CIPHER_DATA: QName = QName::constant(NS_XENC, "CipherData", PREFIX_XENC);
pub const TAG_XENC_CIPHER_VALUE: QName = QName::constant(NS_XENC, "CipherValue", PREFIX_XENC);
pub const TAG_XENC_REFERENCE_LIST: QName = QName::constant(NS_XENC, "ReferenceList", PREFIX_XENC);
pub const TAG_XENC_DATA_REFERENCE: QName = QName::constant(NS_XENC, "DataReference", PREFIX_XENC);
pub const TAG_XENC_OAEP_PARAMS: QName = QName::constant(NS_XENC, "OAEPparams", PREFIX_XENC);
pub const TAG_XENC11_MGF: QName = QName::constant(NS_XENC11, "MGF", "xenc11");

// WS-SecureConversation
pub const TAG_WSC0502_SECURITY_CONTEXT_TOKEN: QName =
    QName::constant(NS_WSC_0502, "SecurityContextToken", PREFIX_WSC);
pub const TAG_WSC0502_IDENTIFIER: QName = QName::constant(NS_WSC_0502, "Identifier", PREFIX_WSC);
pub const TAG_WSC0502_DERIVED_KEY_TOKEN: QName =
    QName::constant(NS_WSC_0502, "DerivedKeyToken", PREFIX_WSC);
pub const TAG_WSC0502_OFFSET: QName = QName::constant(NS_WSC_0502, "Offset", PREFIX_WSC);
pub const TAG_WSC0502_GENERATION: QName = QName::constant(NS_WSC_0502, "Generation", PREFIX_WSC);
pub const TAG_WSC0502_LENGTH: QName = QName::constant(NS_WSC_0502, "Length", PREFIX_WSC);
pub const TAG_WSC0502_LABEL: QName = QName::constant(NS_WSC_0502, "Label", PREFIX_WSC);
pub const TAG_WSC0502_NONCE: QName = QName::constant(NS_WSC_0502, "Nonce", PREFIX_WSC);

// Attributes
pub const ATT_WSU_ID: QName = QName::constant(NS_WSU10, "Id", PREFIX_WSU);
pub const ATT_NULL_ID: QName = QName::constant("", "Id", "");
pub const ATT_NULL_TYPE: QName = QName::constant("", "Type", "");
pub const ATT_NULL_URI: QName = QName::constant("", "URI", "");
pub const ATT_NULL_ALGORITHM: QName = QName::constant("", "Algorithm", "");
pub const ATT_NULL_VALUE_TYPE: QName = QName::constant("", "ValueType", "");
pub const ATT_NULL_ENCODING_TYPE: QName = QName::constant("", "EncodingType", "");
pub const ATT_NULL_MIME_TYPE: QName = QName::constant("", "MimeType", "");
pub const ATT_NULL_ENCODING: QName = QName::constant("", "Encoding", "");
pub const ATT_NULL_RECIPIENT: QName = QName::constant("", "Recipient", "");
pub const ATT_NULL_VALUE: QName = QName::constant("", "Value", "");
pub const ATT_NULL_PREFIX_LIST: QName = QName::constant("", "PrefixList", "");
pub const ATT_WSSE11_TOKEN_TYPE: QName = QName::constant(NS_WSSE11, "TokenType", PREFIX_WSSE11);
pub const ATT_SOAP11_MUST_UNDERSTAND: QName = QName::constant(NS_SOAP11, "mustUnderstand", "soap");
pub const ATT_SOAP12_MUST_UNDERSTAND: QName = QName::constant(NS_SOAP12, "mustUnderstand", "soap");

// Token profile URIs
pub const NS_X509_TOKEN_PROFILE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0";
pub const NS_X509V3_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3";
pub const NS_X509_SKI: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509SubjectKeyIdentifier";
pub const NS_THUMBPRINT: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-soap-message-security-1.1#ThumbprintSHA1";
pub const NS_ENCRYPTED_KEY_SHA1: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-soap-message-security-1.1#EncryptedKeySHA1";
pub const NS_ENCRYPTED_KEY_TOKEN_TYPE: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-soap-message-security-1.1#EncryptedKey";
pub const NS_BASE64_ENCODING: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
pub const NS_PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";
pub const NS_PASSWORD_DIGEST: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
pub const NS_SCT_0502_TOKEN_TYPE: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc/sct";
pub const NS_DKT_0502_TOKEN_TYPE: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc/dk";
pub const NS_P_SHA1_0502: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc/dk/p_sha1";
pub const NS_P_SHA1_13: &str = "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512/dk/p_sha1";

pub const DEFAULT_DERIVED_KEY_LABEL: &str = "WS-SecureConversationWS-SecureConversation";

// Encryption types
pub const NS_XENC_TYPE_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";
pub const NS_XENC_TYPE_CONTENT: &str = "http://www.w3.org/2001/04/xmlenc#Content";

// Algorithms
pub const ALG_TRIPLE_DES: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";
pub const ALG_AES128: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const ALG_AES192: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const ALG_AES256: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const ALG_AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const ALG_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

pub const ALG_KEYTRANSPORT_RSA15: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const ALG_KEYTRANSPORT_RSAOAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
pub const ALG_KEYTRANSPORT_RSAOAEP_XENC11: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";

pub const ALG_MGF1_SHA1: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";
pub const ALG_MGF1_SHA256: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha256";

pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_HMAC_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha1";
pub const ALG_HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";

pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ALG_STR_TRANSFORM: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#STR-Transform";

/// Whether `ns` is one of the SOAP envelope namespaces.
pub fn is_soap_namespace(ns: &str) -> bool {
    ns == NS_SOAP11 || ns == NS_SOAP12
}

/// Whether `name` is a SOAP `Envelope` element of either version.
pub fn is_envelope(name: &QName) -> bool {
    name.local() == "Envelope" && is_soap_namespace(name.namespace())
}

/// Whether `name` is a SOAP `Header` element of either version.
pub fn is_header(name: &QName) -> bool {
    name.local() == "Header" && is_soap_namespace(name.namespace())
}

/// Whether `name` is a SOAP `Body` element of either version.
pub fn is_body(name: &QName) -> bool {
    name.local() == "Body" && is_soap_namespace(name.namespace())
}

/// Whether `name` is a WS-SecureConversation element of either version.
pub fn is_wsc(name: &QName, local: &str) -> bool {
    name.local() == local && (name.namespace() == NS_WSC_0502 || name.namespace() == NS_WSC_13)
}

/// `/Envelope/Body` path of SOAP 1.1.
pub fn soap11_body_path() -> Vec<QName> {
    vec![TAG_SOAP11_ENVELOPE, TAG_SOAP11_BODY]
}

/// `/Envelope/Header` path of SOAP 1.1.
pub fn soap11_header_path() -> Vec<QName> {
    vec![TAG_SOAP11_ENVELOPE, TAG_SOAP11_HEADER]
}

/// `/Envelope/Header/Security` path of SOAP 1.1.
pub fn soap11_security_path() -> Vec<QName> {
    vec![TAG_SOAP11_ENVELOPE, TAG_SOAP11_HEADER, TAG_WSSE_SECURITY]
}
