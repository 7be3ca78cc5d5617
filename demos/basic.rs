//! Connect to a local ShinyDB server, write a document and query it back.
//!
//! Run with: `cargo run --example basic`

use serde_json::json;
use shinydb::query::{Direction, FilterOp};
use shinydb::ShinyDbClient;

#[tokio::main]
async fn main() -> shinydb::Result<()> {
    let mut client = ShinyDbClient::connect("localhost", 7687).await?;

    let auth = client.authenticate("admin", "admin").await?;
    println!("authenticated as {} ({:?})", auth.username, auth.role);

    client
        .query()
        .space("demo")
        .store("products")
        .create(&json!({
            "name": "Road Frame",
            "ListPrice": 1431.5,
            "MakeFlag": 1,
        }))
        .run()
        .await?;

    let expensive = client
        .query()
        .space("demo")
        .store("products")
        .filter("MakeFlag", FilterOp::Eq, 1)
        .and("ListPrice", FilterOp::Gt, 100)
        .order_by("ListPrice", Direction::Desc)
        .limit(10)
        .run()
        .await?;
    println!("query matched {} documents", expensive.count);

    // The textual front-end targets the same IR.
    let actives = client
        .query_str(r#"demo.products.filter(MakeFlag = 1).limit(5)"#)
        .await?;
    println!("text query matched {} documents", actives.count);

    client.flush().await?;
    client.disconnect();
    Ok(())
}
