use anyhow::Result;
use minibus::{Connection, Message, Value};

#[tokio::main]
async fn main() -> Result<()> {
    let c = Connection::session_bus().await?;

    println!("connected as {}", c.unique_name().unwrap_or("<unnamed>"));

    let m = Message::method_call("/org/freedesktop/DBus", "ListNames")
        .with_destination("org.freedesktop.DBus")
        .with_interface("org.freedesktop.DBus");

    let reply = c.call(m).await?;

    if let Some(Value::Array(_, names)) = reply.body().first() {
        for name in names {
            if let Some(name) = name.as_str() {
                println!("{name}");
            }
        }
    }

    Ok(())
}
