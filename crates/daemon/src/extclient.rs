//! External clients attached to ingress gateways

use crate::network::{allocate_address, allocate_address6};
use crate::state::StateManager;
use tracing::info;
use wgmesh_common::store::{record_key, EXT_CLIENTS_TABLE};
use wgmesh_common::{Error, ExtClient, Result};

/// Register an external client behind an ingress gateway node.
pub fn create_ext_client(state: &StateManager, mut client: ExtClient) -> Result<ExtClient> {
    if client.client_id.is_empty() {
        client.client_id = format!("client-{}", hex::encode(rand::random::<[u8; 4]>()));
    }
    client.validate()?;

    let network = state.get_network(&client.network)?;
    let gateway = state.get_live_node(&record_key(&client.ingress_gateway_id, &client.network)?)?;
    if !gateway.is_ingress_gateway {
        return Err(Error::PolicyViolation(format!(
            "node {} is not an ingress gateway",
            gateway.mac_address
        )));
    }

    match state.get_ext_client(&client.client_id, &client.network) {
        Ok(_) => {
            return Err(Error::PolicyViolation(format!(
                "ext client {} already exists",
                client.client_id
            )))
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    if client.address.is_empty() {
        client.address = allocate_address(state, &network)?;
    }
    if client.address6.is_none() {
        client.address6 = allocate_address6(state, &network)?;
    }
    client.ingress_gateway_endpoint = format!("{}:{}", gateway.endpoint, gateway.listen_port);
    client.enabled = true;
    client.last_modified = chrono::Utc::now().timestamp();

    state.put_ext_client(&client)?;
    state.touch_nodes(&client.network)?;
    info!(
        "Created ext client {} behind {} with address {}",
        client.client_id, client.ingress_gateway_id, client.address
    );
    Ok(client)
}

/// External clients of a network
pub fn list_ext_clients(state: &StateManager, network: &str) -> Result<Vec<ExtClient>> {
    Ok(state
        .list_ext_clients()?
        .into_iter()
        .filter(|c| c.network == network)
        .collect())
}

pub fn delete_ext_client(state: &StateManager, client_id: &str, network: &str) -> Result<()> {
    state
        .store()
        .delete(EXT_CLIENTS_TABLE, &record_key(client_id, network)?)?;
    state.touch_nodes(network)?;
    info!("Deleted ext client {} from {}", client_id, network);
    Ok(())
}
