use anyhow::{Context, Result};
use minibus::{introspect, Connection};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let destination = args.next().context("usage: introspect <destination> [path]")?;
    let path = args.next().unwrap_or_else(|| String::from("/"));

    let c = Connection::session_bus().await?;
    let node = introspect::introspect(&c, &destination, &path).await?;

    for interface in &node.interfaces {
        println!("{}", interface.name);

        for method in &interface.methods {
            let args = method
                .args
                .iter()
                .map(|a| a.ty.render())
                .collect::<Vec<_>>()
                .join(", ");

            println!("  method {}({args})", method.name);
        }

        for signal in &interface.signals {
            println!("  signal {}", signal.name);
        }

        for property in &interface.properties {
            println!("  property {} : {}", property.name, property.ty);
        }
    }

    for child in &node.nodes {
        if let Some(name) = &child.name {
            println!("node {name}");
        }
    }

    Ok(())
}
