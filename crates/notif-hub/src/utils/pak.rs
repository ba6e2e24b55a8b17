/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Prefixed API Key (PAK) management utilities.
//!
//! This module provides functionality for creating, verifying, and managing
//! Prefixed API Keys using a singleton controller pattern. Both the admin
//! credential and tenant API keys are PAKs; only SHA-256 hashes are stored.

use notif_utils::logging::prelude::*;
use notif_utils::Settings;
use once_cell::sync::OnceCell;
use prefixed_api_key::PrefixedApiKey;
use prefixed_api_key::PrefixedApiKeyController;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::sync::Arc;

/// Singleton instance of the PAK controller.
static PAK_CONTROLLER: OnceCell<Arc<PrefixedApiKeyController<OsRng, Sha256>>> = OnceCell::new();

/// Creates or retrieves the PAK controller.
///
/// # Arguments
///
/// * `config` - Optional settings for initializing the controller.
///
/// # Returns
///
/// Returns a Result containing the Arc-wrapped PAK controller or an error message.
pub fn create_pak_controller(
    config: Option<&Settings>,
) -> Result<Arc<PrefixedApiKeyController<OsRng, Sha256>>, &'static str> {
    match (PAK_CONTROLLER.get(), config) {
        (Some(controller), _) => Ok(controller.clone()),
        (None, Some(cfg)) => {
            let controller = PAK_CONTROLLER.get_or_init(|| {
                info!("Initializing PAK_CONTROLLER for the first time");
                Arc::new(create_pak_controller_inner(cfg).expect("Failed to create PAK controller"))
            });
            Ok(controller.clone())
        }
        (None, None) => Err("PAK_CONTROLLER not initialized and no config provided"),
    }
}

/// Internal function to create a new PAK controller.
fn create_pak_controller_inner(
    config: &Settings,
) -> Result<PrefixedApiKeyController<OsRng, Sha256>, Box<dyn std::error::Error>> {
    let builder = PrefixedApiKeyController::configure()
        .prefix(config.pak.prefix.clone().unwrap())
        .short_token_length(config.pak.short_token_length.unwrap())
        .short_token_prefix(config.pak.short_token_prefix.clone())
        .long_token_length(config.pak.long_token_length.unwrap())
        .rng_osrng()
        .digest_sha256();

    builder.finalize().map_err(|e| e.into())
}

/// Generates a new Prefixed API Key and its hash.
///
/// # Returns
///
/// Returns a Result containing a tuple of the PAK string and its hash, or an error.
pub fn create_pak() -> Result<(String, String), Box<dyn std::error::Error>> {
    let controller = create_pak_controller(None)?;

    controller
        .try_generate_key_and_hash()
        .map(|(pak, hash)| (pak.to_string(), hash))
        .map_err(|e| e.into())
}

/// Verifies a Prefixed API Key against a stored hash.
///
/// # Arguments
///
/// * `pak` - The Prefixed API Key to verify.
/// * `stored_hash` - The previously stored hash to compare against.
///
/// # Returns
///
/// Returns true if the PAK is valid, false otherwise.
pub fn verify_pak(pak: String, stored_hash: String) -> bool {
    let pak = match PrefixedApiKey::from_string(pak.as_str()) {
        Ok(pak) => pak,
        Err(_) => return false,
    };
    let controller = match create_pak_controller(None) {
        Ok(controller) => controller,
        Err(_) => return false,
    };
    let computed_hash = controller.long_token_hashed(&pak);
    stored_hash == computed_hash
}

/// Generates a hash for a given Prefixed API Key.
///
/// # Arguments
///
/// * `pak` - The Prefixed API Key to hash.
///
/// # Returns
///
/// Returns the generated hash, or None when the key is malformed.
pub fn generate_pak_hash(pak: &str) -> Option<String> {
    let pak = PrefixedApiKey::from_string(pak).ok()?;
    let controller = create_pak_controller(None).ok()?;
    Some(controller.long_token_hashed(&pak))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn init_controller() {
        let config = Settings::new(None).expect("Failed to load configuration");
        let _ = create_pak_controller(Some(&config));
    }

    #[test]
    #[serial]
    fn test_pak_controller_singleton() {
        init_controller();

        let controller1 = create_pak_controller(None).expect("Failed to get controller");
        let controller2 = create_pak_controller(None).expect("Failed to get controller");

        assert_eq!(
            Arc::as_ptr(&controller1) as usize,
            Arc::as_ptr(&controller2) as usize,
            "Controllers should have the same memory address"
        );

        let (pak1, hash1) = create_pak().unwrap();
        let (pak2, hash2) = create_pak().unwrap();

        assert_ne!(pak1, pak2, "Generated PAKs should be different");
        assert_ne!(hash1, hash2, "Generated hashes should be different");
    }

    #[test]
    #[serial]
    fn test_verify_pak() {
        init_controller();

        let (pak, hash) = create_pak().unwrap();

        assert!(
            verify_pak(pak.clone(), hash.clone()),
            "PAK verification failed"
        );

        assert!(
            !verify_pak(
                pak.clone(),
                "0000000000000000000000000000000000000000000000000000000000000000".to_string()
            ),
            "Invalid PAK should not verify"
        );

        assert!(
            !verify_pak("garbage".to_string(), hash),
            "Malformed PAK should not verify"
        );
    }

    #[test]
    #[serial]
    fn test_generate_pak_hash() {
        init_controller();

        let (pak, original_hash) = create_pak().unwrap();

        let generated_hash = generate_pak_hash(&pak).unwrap();
        assert_eq!(
            original_hash, generated_hash,
            "Generated hash should match the original hash"
        );

        for _ in 0..10 {
            assert_eq!(
                generated_hash,
                generate_pak_hash(&pak).unwrap(),
                "Hash generation should be consistent"
            );
        }

        assert!(generate_pak_hash("not-a-pak").is_none());
    }
}
