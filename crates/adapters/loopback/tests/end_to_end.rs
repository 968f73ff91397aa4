use std::sync::Arc;

use thingmesh_adapter_loopback::LoopbackNetwork;
use thingmesh_app::executor::Executor;
use thingmesh_app::local::LocalThingBuilder;
use thingmesh_app::ports::Technology;
use thingmesh_app::remote::TransportTechnology;
use thingmesh_app::thing::Thing;
use thingmesh_domain::catalog::{base, level, onoff, scene};
use thingmesh_domain::error::{MeshError, Rejection};
use thingmesh_domain::uri::Uri;

struct Node {
    technology: Arc<TransportTechnology>,
    executor: Executor,
}

fn node(network: &Arc<LoopbackNetwork>, authority: &str) -> Node {
    let executor = Executor::current().unwrap();
    let transport = network.join(authority).unwrap();
    Node {
        technology: TransportTechnology::new(executor.clone(), transport),
        executor,
    }
}

fn switch(node: &Node, name: &str) -> Thing {
    let thing = LocalThingBuilder::new()
        .with_trait(&onoff::TRAIT)
        .with_trait(&level::TRAIT)
        .name(name)
        .build(&node.executor);
    node.technology.host(&thing).unwrap();
    thing
}

fn uri(text: &str) -> Uri {
    text.parse().unwrap()
}

#[tokio::test]
async fn should_read_and_write_remote_thing_through_proxy() {
    let network = LoopbackNetwork::new();
    let (a, b) = (node(&network, "a"), node(&network, "b"));
    let lamp = switch(&a, "lamp");

    let proxy = b.technology.thing_for_native_uri(&uri("loop://a/1/")).unwrap();
    proxy.set_property(&level::STAT_VALUE, 0.5).await.unwrap();
    proxy.toggle_property(&onoff::STAT_VALUE).await.unwrap();

    assert_eq!(lamp.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.5));
    assert_eq!(lamp.fetch_property(&onoff::STAT_VALUE).await.unwrap(), Some(true));
    let name = proxy.fetch_property(&base::META_NAME).await.unwrap();
    assert_eq!(name.as_deref(), Some("lamp"));
    assert_eq!(proxy.cached_property(&onoff::STAT_VALUE).unwrap(), None);
    assert_eq!(proxy.cached_property(&level::STAT_VALUE).unwrap(), Some(0.5));
}

#[tokio::test]
async fn should_fail_when_remote_index_is_unknown() {
    let network = LoopbackNetwork::new();
    let (a, b) = (node(&network, "a"), node(&network, "b"));
    switch(&a, "lamp");

    let proxy = b.technology.thing_for_native_uri(&uri("loop://a/7/")).unwrap();
    let err = proxy.fetch_property(&level::STAT_VALUE).await.unwrap_err();
    assert!(matches!(err, MeshError::UnknownResource { .. }));
}

#[tokio::test]
async fn should_save_and_delete_remote_scene() {
    let network = LoopbackNetwork::new();
    let (a, b) = (node(&network, "a"), node(&network, "b"));
    let bulb = LocalThingBuilder::dimmable_light().build(&a.executor);
    a.technology.host(&bulb).unwrap();

    let proxy = b.technology.thing_for_native_uri(&uri("loop://a/1/")).unwrap();
    let child = proxy
        .invoke_method(&scene::save_method::<Thing>(), scene::PARAM_SCENE_ID.with("night".into()))
        .await
        .unwrap();
    assert_eq!(
        b.technology.native_uri_for_thing(&child).unwrap().as_str(),
        "loop://a/1/ch/scen/night/"
    );
    assert_eq!(child.parent().as_ref(), Some(&proxy));
    assert_eq!(
        proxy.fetch_children_for_trait(scene::TRAIT_ID).await.unwrap(),
        vec![child.clone()]
    );

    assert!(child.delete().await.unwrap());
    assert!(bulb.fetch_children_for_trait(scene::TRAIT_ID).await.unwrap().is_empty());
}

#[tokio::test]
async fn should_fan_group_writes_out_to_every_node() {
    let network = LoopbackNetwork::new();
    let nodes = [node(&network, "a"), node(&network, "b"), node(&network, "c")];
    let mut lamps = Vec::new();
    for node in &nodes[..2] {
        let lamp = switch(node, "lamp");
        let group = node.technology.fetch_or_create_group_with_id("room").await.unwrap();
        node.technology.host(&group).unwrap();
        group.add_member(&lamp).await.unwrap();
        lamps.push(lamp);
    }
    let outsider = switch(&nodes[2], "outsider");

    let group = nodes[0]
        .technology
        .fetch_or_create_group_with_id("room")
        .await
        .unwrap();
    group.set_property(&level::STAT_VALUE, 0.25).await.unwrap();
    group.toggle_property(&onoff::STAT_VALUE).await.unwrap();

    for lamp in &lamps {
        assert_eq!(lamp.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.25));
        assert_eq!(lamp.fetch_property(&onoff::STAT_VALUE).await.unwrap(), Some(true));
    }
    assert_eq!(outsider.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.0));
    assert_eq!(group.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.25));
}

#[tokio::test]
async fn should_reject_members_the_group_cannot_reach() {
    let network = LoopbackNetwork::new();
    let (a, b) = (node(&network, "a"), node(&network, "b"));
    let group = a.technology.fetch_or_create_group_with_id("room").await.unwrap();

    let stray = LocalThingBuilder::new().build(&a.executor);
    let err = group.add_member(&stray).await.unwrap_err();
    assert!(matches!(err, MeshError::UnacceptableThing(Rejection::Unassociated(_))));

    let _lamp = switch(&b, "lamp");
    let proxy = a.technology.thing_for_native_uri(&uri("loop://b/1/")).unwrap();
    group.add_member(&proxy).await.unwrap();
    assert_eq!(group.fetch_members().await.unwrap(), vec![proxy]);
    assert!(!group.has_local_members());
}
