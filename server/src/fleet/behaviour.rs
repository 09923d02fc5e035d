use libp2p::{gossipsub, identify, identity, ping, swarm::NetworkBehaviour};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::config::FleetConfig;

/// Composed NetworkBehaviour for a fleet node.
/// Combines gossipsub (room fan-out), identify (peer info exchange), and
/// ping (liveness). The fleet runs server-to-server on a flat network, so
/// no NAT traversal behaviours are composed in.
#[derive(NetworkBehaviour)]
pub struct FleetBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// Build the composed NetworkBehaviour with configuration from FleetConfig.
pub fn build_behaviour(keypair: &identity::Keypair, config: &FleetConfig) -> FleetBehaviour {
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .mesh_n(config.mesh_n)
        .mesh_n_low(config.mesh_n_low)
        .mesh_n_high(config.mesh_n_high)
        .heartbeat_interval(Duration::from_secs(1))
        .max_transmit_size(config.max_transmit_size)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .flood_publish(true)
        .message_id_fn(|msg| {
            // Dedup by SHA-256 content hash
            let mut hasher = Sha256::new();
            hasher.update(&msg.data);
            gossipsub::MessageId::from(hasher.finalize().to_vec())
        })
        .build()
        .expect("Valid gossipsub config");

    let gossipsub_behaviour = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .expect("Valid gossipsub behaviour");

    FleetBehaviour {
        gossipsub: gossipsub_behaviour,
        identify: identify::Behaviour::new(identify::Config::new(
            "/momentum-fleet/1.0.0".to_string(),
            keypair.public(),
        )),
        ping: ping::Behaviour::default(),
    }
}
