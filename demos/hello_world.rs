//! Greets every name sent into a two-replica pool.
//!
//! Run with `RUST_LOG=flowloom=debug cargo run --example hello_world` to watch
//! the router and replicas at work.

use flowloom::{ComponentRegistry, Dataflow, GraphSpec, Ports, Role, Stage, StageError, async_trait};
use tracing_subscriber::EnvFilter;

/// Source that turns each dispatched name into a greeting.
struct HelloWorld;

#[async_trait(?Send)]
impl Stage<String> for HelloWorld {
  fn role(&self) -> Role {
    Role::Adapter
  }

  async fn run(&mut self, ports: &mut Ports<String>) -> Result<(), StageError> {
    loop {
      for name in ports.receive_all("in") {
        ports.send("out", format!("Hello {name}"));
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Sink that prints each line.
struct ConsoleWriter;

#[async_trait(?Send)]
impl Stage<String> for ConsoleWriter {
  fn role(&self) -> Role {
    Role::Publisher
  }

  async fn run(&mut self, ports: &mut Ports<String>) -> Result<(), StageError> {
    loop {
      for line in ports.receive_all("in") {
        println!("{line}");
      }
      ports.yield_ctrl().await;
    }
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let mut registry: ComponentRegistry<String> = ComponentRegistry::with_builtins();
  registry.register("hello", |_| Ok(HelloWorld));
  registry.register("console", |_| Ok(ConsoleWriter));

  let spec = GraphSpec::new()
    .component("greeter", "hello")
    .component("printer", "console")
    .link("greeter", "printer", "out", "in");

  let mut flow = Dataflow::new(spec, registry, 2)?;
  for name in ["Tom", "Dick", "Harry"] {
    flow.send(name.to_string())?;
  }

  for stats in flow.wait_for_completion().await? {
    println!("replica {} handled {} item(s)", stats.replica, stats.dispatched);
  }
  Ok(())
}
