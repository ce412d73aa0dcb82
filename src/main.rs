//! Demonstration driver for the sigmap engine
//!
//! Builds a map from admin messages the way a monitor would, streams a few
//! source samples through it, and prints the emitted wire frames.

use anyhow::Result;

use sigmap::{
    AdminMessage, AffineCompiler, BoundaryAction, Direction, EngineConfig, LocalSignal, Map, Mode,
    QueueTransport, Slot, Timetag, Value, ValueType,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("sigmap - signal mapping engine");
    println!("==============================");

    // a local pressure sensor feeding a remote filter cutoff
    let sensor = LocalSignal {
        name: "/sensor/pressure".into(),
        ty: ValueType::Int32,
        length: 1,
        minimum: Some(vec![Value::Int32(0)]),
        maximum: Some(vec![Value::Int32(1023)]),
    };
    let source = Slot::from_signal(Direction::Source, sensor);
    let destination = Slot::new(Direction::Destination);

    let config = EngineConfig::default();
    let mut map = Map::new(vec![source], destination, Box::new(AffineCompiler), &config)?;
    map.set_hook(Box::new(|event| {
        println!("  lifecycle: {:?} ({:?})", event.action, event.signal);
    }));

    // transport link to the destination device is up
    map.set_destination_link()?;

    // discovery: the destination declares its shape and range
    let mut msg = AdminMessage::default();
    msg.dst_type = Some(ValueType::Float32);
    msg.dst_length = Some(1);
    msg.dst_min = Some(vec![Value::Float32(20.0)]);
    msg.dst_max = Some(vec![Value::Float32(18000.0)]);
    msg.bound_min = Some(BoundaryAction::Clamp);
    msg.bound_max = Some(BoundaryAction::Clamp);
    msg.mode = Some(Mode::Linear);
    let updated = map.set_from_message(&msg)?;

    println!("\nAdmin pass applied {updated} fields");
    println!("  mode: {}", map.mode());
    println!("  expression: {:?}", map.expression());
    println!("  ready: {}", map.is_ready());

    // stream samples through the map
    let mut transport = QueueTransport::default();
    println!("\nStreaming samples:");
    for raw in [0, 256, 512, 1023, 2000] {
        let outcome = map.ingest(0, 0, &[Value::Int32(raw)], Timetag::now())?;
        let sent = map.emit_to(&mut transport, "/filter/cutoff", 0, None)?;
        println!("  in {raw:>5} -> {outcome:?} (sent: {sent})");
    }

    println!("\nEmitted frames:");
    for frame in &transport.sent {
        println!("  {} {:?}", frame.path, frame.args);
        let bytes = frame.serialize()?;
        println!("    encoded {} bytes", bytes.len());
    }

    map.destroy();
    Ok(())
}
