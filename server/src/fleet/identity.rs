use libp2p::identity;
use libp2p::PeerId;
use std::fs;
use std::path::Path;

/// Load or generate this process's libp2p Ed25519 identity keypair.
///
/// The keypair is stored as a 32-byte Ed25519 seed at
/// `{data_dir}/fleet_identity.key` so a restarted process keeps the same
/// PeerId. This is the process identity within the fleet mesh, unrelated to
/// Momentum user identities.
pub fn fleet_identity_keypair(data_dir: &str) -> identity::Keypair {
    let key_path = Path::new(data_dir).join("fleet_identity.key");

    if key_path.exists() {
        let seed_bytes = fs::read(&key_path).expect("Failed to read fleet_identity.key");
        assert!(
            seed_bytes.len() == 32,
            "fleet_identity.key must be 32 bytes (Ed25519 seed), found {} bytes",
            seed_bytes.len()
        );
        let mut seed = seed_bytes.clone();
        let ed25519_keypair = identity::ed25519::Keypair::try_from_bytes(&mut seed)
            .expect("Invalid Ed25519 seed in fleet_identity.key");
        let keypair = identity::Keypair::from(ed25519_keypair);
        let peer_id = PeerId::from(keypair.public());
        tracing::info!("Fleet PeerId: {} (loaded from {})", peer_id, key_path.display());
        keypair
    } else {
        let keypair = identity::Keypair::generate_ed25519();
        let peer_id = PeerId::from(keypair.public());

        // ed25519::Keypair::to_bytes() yields 64 bytes (seed + public);
        // only the first 32 (the seed) need persisting.
        let ed25519_kp = keypair
            .clone()
            .try_into_ed25519()
            .expect("Keypair is Ed25519");
        let full_bytes = ed25519_kp.to_bytes();
        let seed = &full_bytes[..32];

        fs::create_dir_all(data_dir).expect("Failed to create data directory");
        fs::write(&key_path, seed).expect("Failed to write fleet_identity.key");
        tracing::info!(
            "Fleet PeerId: {} (generated, saved to {})",
            peer_id,
            key_path.display()
        );
        keypair
    }
}
