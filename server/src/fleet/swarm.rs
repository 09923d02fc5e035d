use futures_util::StreamExt;
use libp2p::{gossipsub, identify, identity, noise, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::behaviour::{build_behaviour, FleetBehaviour, FleetBehaviourEvent};
use super::config::FleetConfig;
use super::directory::FleetDirectory;

/// Commands sent from the adapter into the swarm event loop.
pub enum FleetCommand {
    /// Subscribe this process's gossipsub to a topic.
    Subscribe(String),
    /// Unsubscribe from a topic.
    Unsubscribe(String),
    /// Publish data to a topic.
    Publish { topic: String, data: Vec<u8> },
}

/// Events emitted from the swarm event loop to the consumer task.
pub enum FleetEvent {
    /// Received a gossip message.
    Message {
        source: PeerId,
        topic: String,
        data: Vec<u8>,
    },
    /// A fleet peer connected.
    PeerConnected(PeerId),
    /// A fleet peer disconnected.
    PeerDisconnected(PeerId),
}

/// Build the libp2p Swarm with the fleet composed behaviour.
pub fn build_swarm(keypair: identity::Keypair, config: &FleetConfig) -> Swarm<FleetBehaviour> {
    let config_clone = config.clone();

    SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            Default::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .expect("TCP transport")
        .with_behaviour(|key| build_behaviour(key, &config_clone))
        .expect("Behaviour")
        .build()
}

/// Run the swarm event loop.
///
/// Spawned as a tokio task; processes swarm events (gossip messages, peer
/// connections, identify) and commands from the adapter. Communication with
/// the rest of the process happens only via the mpsc channels.
pub async fn run_fleet_loop(
    mut swarm: Swarm<FleetBehaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<FleetCommand>,
    evt_tx: mpsc::UnboundedSender<FleetEvent>,
    directory: Arc<FleetDirectory>,
    listen_addr: Multiaddr,
    bootstrap_peers: Vec<Multiaddr>,
) {
    match swarm.listen_on(listen_addr.clone()) {
        Ok(_) => tracing::info!("Fleet swarm listening on {}", listen_addr),
        Err(e) => {
            tracing::error!("Failed to listen on {}: {}", listen_addr, e);
            return;
        }
    }

    for addr in bootstrap_peers {
        match swarm.dial(addr.clone()) {
            Ok(()) => tracing::info!("Dialing fleet peer {}", addr),
            Err(e) => tracing::warn!("Failed to dial fleet peer {}: {}", addr, e),
        }
    }

    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &evt_tx, &directory);
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_fleet_command(&mut swarm, cmd),
                    None => {
                        tracing::info!("Fleet command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle one event from the libp2p Swarm.
fn handle_swarm_event(
    event: libp2p::swarm::SwarmEvent<FleetBehaviourEvent>,
    evt_tx: &mpsc::UnboundedSender<FleetEvent>,
    directory: &FleetDirectory,
) {
    use libp2p::swarm::SwarmEvent as LibSwarmEvent;

    match event {
        LibSwarmEvent::Behaviour(behaviour_event) => {
            handle_behaviour_event(behaviour_event, evt_tx, directory);
        }
        LibSwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
            tracing::debug!("Fleet connection established: {} via {:?}", peer_id, endpoint);
            let _ = evt_tx.send(FleetEvent::PeerConnected(peer_id));
        }
        LibSwarmEvent::ConnectionClosed { peer_id, .. } => {
            tracing::debug!("Fleet connection closed: {}", peer_id);
            directory.unregister_peer(&peer_id);
            let _ = evt_tx.send(FleetEvent::PeerDisconnected(peer_id));
        }
        LibSwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!("Fleet listening on: {}", address);
        }
        _ => {}
    }
}

/// Handle a behaviour-level event.
fn handle_behaviour_event(
    event: FleetBehaviourEvent,
    evt_tx: &mpsc::UnboundedSender<FleetEvent>,
    directory: &FleetDirectory,
) {
    match event {
        FleetBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        }) => {
            let topic = message.topic.to_string();
            tracing::debug!(
                "Gossip message from {} on topic {}",
                propagation_source,
                topic
            );
            let _ = evt_tx.send(FleetEvent::Message {
                source: propagation_source,
                topic,
                data: message.data,
            });
        }
        FleetBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic }) => {
            tracing::debug!("Peer {} subscribed to {}", peer_id, topic);
            directory.add_topic(&peer_id, &topic.to_string());
        }
        FleetBehaviourEvent::Gossipsub(gossipsub::Event::Unsubscribed { peer_id, topic }) => {
            tracing::debug!("Peer {} unsubscribed from {}", peer_id, topic);
            directory.remove_topic(&peer_id, &topic.to_string());
        }
        FleetBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
            tracing::debug!(
                "Identify: {} advertises {} listen addrs",
                peer_id,
                info.listen_addrs.len()
            );
            directory.update_multiaddrs(&peer_id, info.listen_addrs);
        }
        _ => {}
    }
}

/// Handle a command from the adapter.
fn handle_fleet_command(swarm: &mut Swarm<FleetBehaviour>, cmd: FleetCommand) {
    match cmd {
        FleetCommand::Subscribe(topic_str) => {
            let topic = gossipsub::IdentTopic::new(&topic_str);
            match swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                Ok(true) => tracing::info!("Subscribed to fleet topic: {}", topic_str),
                Ok(false) => tracing::debug!("Already subscribed to topic: {}", topic_str),
                Err(e) => tracing::error!("Failed to subscribe to {}: {:?}", topic_str, e),
            }
        }
        FleetCommand::Unsubscribe(topic_str) => {
            let topic = gossipsub::IdentTopic::new(&topic_str);
            if swarm.behaviour_mut().gossipsub.unsubscribe(&topic) {
                tracing::info!("Unsubscribed from fleet topic: {}", topic_str);
            } else {
                tracing::debug!("Was not subscribed to topic: {}", topic_str);
            }
        }
        FleetCommand::Publish { topic, data } => {
            let gossip_topic = gossipsub::IdentTopic::new(&topic);
            match swarm.behaviour_mut().gossipsub.publish(gossip_topic, data) {
                Ok(msg_id) => {
                    tracing::debug!("Published to {}, message_id: {:?}", topic, msg_id)
                }
                Err(gossipsub::PublishError::NoPeersSubscribedToTopic) => {
                    // Nobody else subscribed anywhere — the offline queue is
                    // the fallback, so this is routine, not an error.
                    tracing::debug!("No fleet peers subscribed to {}", topic);
                }
                Err(e) => tracing::warn!("Failed to publish to {}: {:?}", topic, e),
            }
        }
    }
}
