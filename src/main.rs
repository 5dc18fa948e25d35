use std::sync::Arc;

use ds::{AutoResponder, MemoryDeliveryService, OutboundRequest, TransportEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use twinme_core::executors::{
    delete_key, DeleteObjectExecutor, DeleteObjectTask, DeleteStep, GetListExecutor,
};
use twinme_core::{bootstrap_core_from_env, Executor, SingleFlightRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Space {
    id: Uuid,
    name: String,
}

fn demo_responder() -> AutoResponder {
    let spaces = vec![
        Space {
            id: Uuid::new_v4(),
            name: "Personal".to_string(),
        },
        Space {
            id: Uuid::new_v4(),
            name: "Work".to_string(),
        },
    ];
    Arc::new(move |request: &OutboundRequest| {
        let payload = match request.operation.as_str() {
            "get-spaces" => serde_json::to_vec(&spaces).ok()?,
            _ => Vec::new(),
        };
        Some(TransportEvent::Response {
            request_id: request.request_id,
            payload,
        })
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let delivery = MemoryDeliveryService::new().with_responder(demo_responder());
    let core = bootstrap_core_from_env(Arc::new(delivery.clone()))?;
    let context = core.context.clone();
    delivery.go_online();

    // Three readers, one round trip.
    let spaces: SingleFlightRegistry<String, GetListExecutor<Space>> = SingleFlightRegistry::new();
    let readers = (0..3).map(|_| {
        spaces.attach_or_start("get-spaces".to_string(), || {
            Executor::new(&context, GetListExecutor::new("get-spaces"))
        })
    });
    for (reader, result) in futures::future::join_all(readers).await.into_iter().enumerate() {
        let list = result?;
        println!("reader {reader}: {} spaces", list.len());
    }
    println!("get-spaces requests sent: {}", delivery.sent_ids("get-spaces").len());

    let deletes: SingleFlightRegistry<String, DeleteObjectExecutor> = SingleFlightRegistry::new();
    let contact_id = Uuid::new_v4();
    let behavior = DeleteObjectTask::executor(
        "contact",
        contact_id,
        vec![
            DeleteStep::remote("unbind-twincode"),
            DeleteStep::NotApplicable,
            DeleteStep::local("delete-object"),
        ],
    )?;
    let deleted = deletes
        .attach_or_start(delete_key("contact", &contact_id), || {
            Executor::new(&context, behavior)
        })
        .await?;
    println!("deleted contact {deleted}");

    core.shutdown().await
}
