/// Hash a plaintext password with bcrypt at the given cost.
pub fn hash_password(plaintext: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plaintext, cost)
}

/// Constant-time check of a plaintext password against a stored hash.
/// A malformed hash never verifies.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}
