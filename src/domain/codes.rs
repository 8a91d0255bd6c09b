use rand::Rng;
use uuid::Uuid;

const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Uppercase base36 string of the given length.
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// `WIFI-<last 4 digits of epoch millis>-<4 base36>`, redeemed on the captive portal.
pub fn generate_access_token(epoch_millis: i64) -> String {
    format!("WIFI-{:04}-{}", epoch_millis.rem_euclid(10_000), random_base36(4))
}

/// `REF-<first 8 of user id, uppercased>-<4 base36>`.
pub fn generate_referral_code(user_id: Uuid) -> String {
    let simple = user_id.simple().to_string();
    format!("REF-{}-{}", simple[..8].to_uppercase(), random_base36(4))
}
