//! Gates an `http` handler by peer IP and prints the status each simulated client receives.
//!
//! Run with `cargo run --example http_gate`.

use std::{net::SocketAddr, time::Duration};

use admission_control::{
    Error,
    admission::{AdmissionController, AdmissionError, AdmissionLayer, AdmissionSettings, PeerAddr, Quota},
};
use http::{Request, Response, StatusCode};
use tower::{Layer, Service, ServiceExt, service_fn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let settings = AdmissionSettings::builder()
        .global_limit(Quota::new(20.0, 5))
        .per_client_limit(Quota::new(2.0, 2))
        .cleanup_interval(Duration::from_secs(1))
        .client_expiration(Duration::from_secs(2))
        .enable_log(true)
        .build();
    let controller = AdmissionController::new(Some(settings));

    let handler = service_fn(|request: Request<()>| async move {
        Ok::<_, Error>(Response::new(format!("served {}", request.uri())))
    });
    let mut svc = AdmissionLayer::new(controller.clone(), PeerAddr).layer(handler);

    let peers = [
        "10.0.0.1:4000",
        "10.0.0.1:4001",
        "10.0.0.1:4002",
        "10.0.0.2:5000",
        "10.0.0.3:6000",
        "10.0.0.4:7000",
    ];
    for (i, peer) in peers.iter().enumerate() {
        let mut request = Request::builder().uri(format!("/items/{i}")).body(())?;
        request.extensions_mut().insert(peer.parse::<SocketAddr>()?);

        let status = match ServiceExt::<Request<()>>::ready(&mut svc).await?.call(request).await {
            Ok(_) => StatusCode::OK,
            Err(error)
                if error
                    .downcast_ref::<AdmissionError>()
                    .is_some_and(AdmissionError::is_rejected) =>
            {
                StatusCode::TOO_MANY_REQUESTS
            }
            Err(error) => return Err(error),
        };
        println!("{peer} -> {status}");
    }

    println!("tracked clients: {:?}", controller.info().keys().collect::<Vec<_>>());
    tokio::time::sleep(Duration::from_secs(4)).await;
    println!("tracked clients after idling: {}", controller.count());

    controller.stop();
    Ok(())
}
