// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for the coordination plumbing: the muxed transport
//! with its server-allocated return streams, and the controller-side
//! placement pipeline over capability snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use flotilla_core::domain::capability::{Capability, CapabilitySet, ContainerInfo};
use flotilla_core::domain::exlink::{self, FixedSampler};
use flotilla_core::domain::filter;
use flotilla_core::domain::manifest::{Link, Manifest, PortSpec};
use flotilla_core::domain::placement::{find_best_agent, CompiledRestrict};
use flotilla_core::infrastructure::mux::{Mux, CHAN_NEW_STREAM, CHAN_RPC};
use flotilla_core::infrastructure::stream::StreamRegistry;
use flotilla_core::infrastructure::transport::{
    open_stream, read_frame, write_frame, AllocResponse, Client, Reply, Request,
};

/// A stripped-down agent: answers `StreamConn.Alloc` and `Docker.PullImage`
/// over the real wire protocol, writing progress bytes into the return
/// stream. Engine-free so the transport itself is what gets tested.
async fn spawn_stub_agent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let streams = StreamRegistry::new();

    let mut mux = Mux::new();
    let rpc_streams = streams.clone();
    mux.handle(
        CHAN_RPC,
        Arc::new(move |mut conn: TcpStream| {
            let streams = rpc_streams.clone();
            async move {
                while let Ok(request) = read_frame::<_, Request>(&mut conn).await {
                    let reply = match request {
                        Request::AllocStream => Reply::Ok(
                            serde_json::to_value(AllocResponse {
                                id: streams.alloc(),
                            })
                            .unwrap(),
                        ),
                        Request::PullImage(req) => match streams.get(req.stream_id).await {
                            Ok(mut stream) => {
                                stream
                                    .write_all(b"{\"status\":\"Downloaded\"}\n")
                                    .await
                                    .unwrap();
                                stream.shutdown().await.unwrap();
                                Reply::Ok(serde_json::Value::Null)
                            }
                            Err(err) => Reply::Err(err.to_string()),
                        },
                        other => Reply::Err(format!("unsupported: {other:?}")),
                    };
                    if write_frame(&mut conn, &reply).await.is_err() {
                        return;
                    }
                }
            }
        }),
    );
    let stream_streams = streams.clone();
    mux.handle(
        CHAN_NEW_STREAM,
        Arc::new(move |mut conn: TcpStream| {
            let streams = stream_streams.clone();
            async move {
                if let Ok(id) = conn.read_u32().await {
                    let _ = streams.put(id, conn);
                }
            }
        }),
    );
    let mux = Arc::new(mux);

    tokio::spawn(async move {
        loop {
            let Ok((conn, _)) = listener.accept().await else {
                return;
            };
            let mux = mux.clone();
            tokio::spawn(async move {
                let _ = mux.dispatch(conn).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn return_stream_carries_progress_bytes() {
    let addr = spawn_stub_agent().await;
    let mut client = Client::dial(&addr).await.unwrap();
    let (stream_id, mut stream) = open_stream(&mut client, &addr).await.unwrap();

    let reader = tokio::spawn(async move {
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        buf
    });

    client
        .pull_image(flotilla_core::infrastructure::transport::PullImageRequest {
            image: "nginx".to_string(),
            stream_id,
        })
        .await
        .unwrap();

    let progress = reader.await.unwrap();
    assert_eq!(progress, "{\"status\":\"Downloaded\"}\n");
}

#[tokio::test]
async fn stale_stream_id_fails_the_call() {
    let addr = spawn_stub_agent().await;
    let mut client = Client::dial(&addr).await.unwrap();
    // Never open the stream: the id is unknown to the registry.
    let err = client
        .pull_image(flotilla_core::infrastructure::transport::PullImageRequest {
            image: "nginx".to_string(),
            stream_id: 12345,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("12345"));
}

fn capability(agent: &str, labels: &[(&str, &str)]) -> Capability {
    Capability {
        available: true,
        agent: agent.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        ..Default::default()
    }
}

#[tokio::test]
async fn filter_narrows_the_capability_set() {
    let mut caps = CapabilitySet::new();
    caps.insert("a1:7300".into(), capability("api-1", &[("env", "prd")]));
    caps.insert("a2:7300".into(), capability("db-1", &[("env", "prd")]));
    caps.insert("a3:7300".into(), capability("api-2", &[("env", "dev")]));

    let expr = filter::parse("A@^api- and (L@env:prd or L@env:stg)").unwrap();
    caps.retain(|cap| expr.eval(cap));

    assert_eq!(caps.addresses(), vec!["a1:7300".to_string()]);
}

#[tokio::test]
async fn placement_and_exlink_resolution_work_from_one_snapshot() {
    // db runs on a1 with a published port bound to the wildcard address;
    // the api manifest exlinks it and must land on the emptier agent.
    let mut db_host = capability("db-1", &[]);
    db_host.all_names = vec!["db".into()];
    db_host.used_names = vec!["db".into()];
    db_host.ip_addrs = vec!["10.0.0.5".into()];
    db_host.containers.insert(
        "db".into(),
        ContainerInfo {
            ports: vec![PortSpec {
                exposed: "5432/tcp".into(),
                host_ip: "0.0.0.0".into(),
                host_port: 5432,
            }],
        },
    );

    let mut caps = CapabilitySet::new();
    caps.insert("a1:7300".into(), db_host);
    caps.insert("a2:7300".into(), capability("api-1", &[]));

    let mut manifest: Manifest = serde_json::from_str(
        r#"{"name": "api", "image": "nginx", "exlinks": ["db:DB"]}"#,
    )
    .unwrap();
    manifest.validate().unwrap();

    let restrict = CompiledRestrict::compile(&manifest.restrict).unwrap();
    let chosen = find_best_agent(&manifest, &restrict, caps.clone()).unwrap();
    assert_eq!(chosen, "a2:7300");

    let links = vec![Link {
        name: "db".into(),
        alias: "DB".into(),
    }];
    let resolved = exlink::resolve(&links, &caps, &mut FixedSampler(0)).unwrap();
    assert_eq!(resolved.len(), 1);
    let env = resolved[0].env().unwrap();
    assert_eq!(env["DB_PORT"], "tcp://10.0.0.5:5432");
    assert_eq!(env["DB_PORT_5432_TCP"], "tcp://10.0.0.5:5432");
    assert_eq!(env["DB_PORT_5432_TCP_ADDR"], "10.0.0.5");
    assert_eq!(env["DB_PORT_5432_TCP_PORT"], "5432");
    assert_eq!(env["DB_PORT_5432_TCP_PROTO"], "tcp");
}
