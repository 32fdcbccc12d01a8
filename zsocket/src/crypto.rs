use crate::constants::{CHECK_MAC_LEN, CHECK_NONCE_LEN};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generates the random challenge sent with the check code
pub fn generate_nonce() -> [u8; CHECK_NONCE_LEN] {
    let mut rng = rand::thread_rng();
    rng.gen()
}

/// Computes the check-code proof: HMAC-SHA256(password, nonce)
pub fn compute_check_mac(password: &str, nonce: &[u8]) -> [u8; CHECK_MAC_LEN] {
    let mut mac = new_mac(password);
    mac.update(nonce);
    let digest = mac.finalize().into_bytes();

    let mut proof = [0u8; CHECK_MAC_LEN];
    proof.copy_from_slice(&digest);
    proof
}

/// Verifies a check-code proof in constant time
pub fn verify_check_mac(password: &str, nonce: &[u8], proof: &[u8]) -> bool {
    let mut mac = new_mac(password);
    mac.update(nonce);
    mac.verify_slice(proof).is_ok()
}

fn new_mac(password: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    match HmacSha256::new_from_slice(password.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take key of any size"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_nonce() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();

        assert_eq!(nonce1.len(), CHECK_NONCE_LEN);
        assert_ne!(nonce1, nonce2);
    }

    #[test]
    fn test_check_mac_deterministic() {
        let nonce = [3u8; CHECK_NONCE_LEN];

        let mac1 = compute_check_mac("123", &nonce);
        let mac2 = compute_check_mac("123", &nonce);

        assert_eq!(mac1, mac2);
        assert_eq!(mac1.len(), CHECK_MAC_LEN);
    }

    #[test]
    fn test_check_mac_verification() {
        let nonce = generate_nonce();
        let proof = compute_check_mac("123", &nonce);

        assert!(verify_check_mac("123", &nonce, &proof));
        assert!(!verify_check_mac("456", &nonce, &proof));
        assert!(!verify_check_mac("123", &[0u8; CHECK_NONCE_LEN], &proof));
        assert!(!verify_check_mac("123", &nonce, &proof[..16]));
    }

    #[test]
    fn test_check_mac_depends_on_nonce() {
        let a = compute_check_mac("123", &[1u8; CHECK_NONCE_LEN]);
        let b = compute_check_mac("123", &[2u8; CHECK_NONCE_LEN]);
        assert_ne!(a, b);
    }
}
