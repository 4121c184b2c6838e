//! Example: Reading and writing a node through a simulated server
//!
//! Run with: cargo run --example loopback
//!
//! This example demonstrates:
//! - Populating a node object dictionary
//! - A segmented read and an expedited write queued on one `Bus`
//! - Watching store notifications
//!
//! The "server" below answers the frames the client sends, the way a real
//! CANopen device would on the wire.

use canopen_sdo::utils::format_bytes;
use canopen_sdo::{
    AccessType, Bus, CanFrame, DataType, MemoryTransport, NodeIndex, NodeOd, NodeSubIndex,
    ObjectType, Value,
};
use std::time::Instant;

const NODE: u8 = 0x0A;

/// Answers one client frame as a cooperative server would.
fn serve(request: &CanFrame, device_name: &[u8], sent: &mut usize) -> Option<CanFrame> {
    let cmd = request.data[0];
    let mux = &request.data[1..4];
    let reply = |bytes: Vec<u8>| Some(CanFrame::new(0x580 + u32::from(NODE), bytes));

    match cmd & 0xE0 {
        // Initiate upload: announce a segmented transfer
        0x40 => {
            *sent = 0;
            let mut data = vec![0x41];
            data.extend_from_slice(mux);
            data.extend_from_slice(&(device_name.len() as u32).to_le_bytes());
            reply(data)
        }
        // Upload segment
        0x60 => {
            let chunk = &device_name[*sent..(*sent + 7).min(device_name.len())];
            *sent += chunk.len();
            let last = u8::from(*sent >= device_name.len());
            let mut data = vec![(cmd & 0x10) | (((7 - chunk.len()) as u8) << 1) | last];
            data.extend_from_slice(chunk);
            data.resize(8, 0);
            reply(data)
        }
        // Initiate download
        0x20 => {
            let mut data = vec![0x60];
            data.extend_from_slice(mux);
            data.resize(8, 0);
            reply(data)
        }
        _ => None,
    }
}

fn main() -> canopen_sdo::Result<()> {
    // =========================================================================
    // Describe the node
    // =========================================================================

    let rw = AccessType::READ | AccessType::WRITE;
    let mut od = NodeOd::new(0, NODE);
    od.insert_index(
        NodeIndex::new(0x1008, "Manufacturer device name", ObjectType::Var).with_sub_index(
            NodeSubIndex::new(0, "Manufacturer device name", DataType::VisibleString, AccessType::READ),
        ),
    );
    od.insert_index(
        NodeIndex::new(0x1017, "Producer heartbeat time", ObjectType::Var).with_sub_index(
            NodeSubIndex::new(0, "Producer heartbeat time", DataType::Unsigned16, rw)
                .with_unit("ms")
                .with_default_value(Value::U16(0)),
        ),
    );

    let mut bus = Bus::new(0, MemoryTransport::new());
    bus.add_node(od);
    let events = bus.subscribe(NODE)?;

    let name = bus.node(NODE).and_then(|n| n.od().object_id(0x1008, 0));
    let heartbeat = bus.node(NODE).and_then(|n| n.od().object_id(0x1017, 0));
    let (Some(name), Some(heartbeat)) = (name, heartbeat) else {
        return Ok(());
    };

    // =========================================================================
    // Queue a read and a write, then pump frames until both are done
    // =========================================================================

    bus.upload(name)?;
    bus.download(heartbeat, Value::U16(250))?;

    let device_name = b"Loopback servo drive";
    let mut sent = 0;
    while !bus.is_idle() {
        let requests = bus.transport_mut().take_sent();
        if requests.is_empty() {
            bus.poll(Instant::now());
            continue;
        }
        for request in &requests {
            println!("client -> [{}]", format_bytes(&request.data));
            if let Some(response) = serve(request, device_name, &mut sent) {
                println!("server -> [{}]", format_bytes(&response.data));
                bus.handle_frame(&response);
            }
        }
    }

    // =========================================================================
    // Results
    // =========================================================================

    println!("\n=== Notifications ===\n");
    for event in events.try_iter() {
        println!("{} {:?}", event.object_id, event.flags);
    }

    if let Some(node) = bus.node(NODE) {
        println!("\n=== Values ===\n");
        for index in node.od().indexes() {
            for record in index.sub_indexes() {
                let value = record
                    .value()
                    .map_or_else(|| "-".to_string(), ToString::to_string);
                println!(
                    "0x{:04X}.{:02X} {:<28} {:<4} {} {}",
                    index.index(),
                    record.sub_index(),
                    record.name(),
                    record.access_string(),
                    value,
                    record.unit()
                );
            }
        }
    }

    Ok(())
}
