//! Integration tests for ConfigDb against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use common::storage::in_memory::InMemoryInstance;
use common::{DatabaseConfig, Store, StoreRead};
use configdb::{
    Config, ConfigData, ConfigDb, ConfigRead, FieldValues, INIT_INDICATOR, TableData,
};
use tracing_subscriber::EnvFilter;

const DATABASE_CONFIG: &str = r#"{
    "INSTANCES": {
        "redis": { "hostname": "127.0.0.1", "port": 6379, "unix_socket_path": "/var/run/redis/redis.sock" }
    },
    "DATABASES": {
        "APPL_DB": { "id": 0, "separator": ":", "instance": "redis" },
        "CONFIG_DB": { "id": 4, "separator": "|", "instance": "redis" }
    }
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn setup_config_db() -> (ConfigDb, InMemoryInstance) {
    init_tracing();
    let instance = InMemoryInstance::new();
    let databases = DatabaseConfig::from_json(DATABASE_CONFIG).expect("valid database config");
    let db = ConfigDb::connect(&instance, &databases, false, false)
        .await
        .expect("Failed to connect");
    (db, instance)
}

fn fields(pairs: &[(&str, &str)]) -> FieldValues {
    pairs
        .iter()
        .map(|(f, v)| (f.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn should_read_back_replaced_entry() {
    // given
    let (db, _instance) = setup_config_db().await;
    let data = fields(&[("admin_status", "up"), ("mtu", "9100")]);

    // when
    db.set_entry("PORT", "Ethernet0", &data).await.unwrap();

    // then
    assert_eq!(db.get_entry("PORT", "Ethernet0").await.unwrap(), data);
}

#[tokio::test]
async fn should_delete_entry_written_empty() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("PORT", "Ethernet0", &fields(&[("mtu", "9100")]))
        .await
        .unwrap();
    db.set_entry("PORT", "Ethernet4", &fields(&[("mtu", "9100")]))
        .await
        .unwrap();

    // when
    db.set_entry("PORT", "Ethernet0", &FieldValues::new())
        .await
        .unwrap();
    db.mod_entry("PORT", "Ethernet4", &FieldValues::new())
        .await
        .unwrap();

    // then
    assert!(db.get_entry("PORT", "Ethernet0").await.unwrap().is_empty());
    assert!(db.get_entry("PORT", "Ethernet4").await.unwrap().is_empty());
    assert!(db.get_table("PORT").await.unwrap().is_empty());
}

#[tokio::test]
async fn should_prune_fields_on_replace() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("PORT", "Ethernet0", &fields(&[("alias", "etp1"), ("mtu", "9100")]))
        .await
        .unwrap();

    // when
    db.set_entry("PORT", "Ethernet0", &fields(&[("alias", "etp1")]))
        .await
        .unwrap();

    // then
    let table = db.get_table("PORT").await.unwrap();
    assert_eq!(table["Ethernet0"], fields(&[("alias", "etp1")]));
    assert!(!table["Ethernet0"].contains_key("mtu"));
}

#[tokio::test]
async fn should_let_merge_overwrite_and_keep_fields() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("PORT", "Ethernet0", &fields(&[("alias", "etp1"), ("mtu", "9100")]))
        .await
        .unwrap();

    // when
    db.mod_entry("PORT", "Ethernet0", &fields(&[("mtu", "1500"), ("speed", "100000")]))
        .await
        .unwrap();

    // then
    assert_eq!(
        db.get_entry("PORT", "Ethernet0").await.unwrap(),
        fields(&[("alias", "etp1"), ("mtu", "1500"), ("speed", "100000")])
    );
}

#[tokio::test]
async fn should_canonicalize_table_names() {
    // given
    let (db, instance) = setup_config_db().await;

    // when
    db.set_entry("port", "Ethernet0", &fields(&[("mtu", "9100")]))
        .await
        .unwrap();

    // then
    let store = instance.database(4).unwrap();
    assert_eq!(store.keys("*").await.unwrap(), vec!["PORT|Ethernet0"]);
    assert_eq!(db.get_table("Port").await.unwrap().len(), 1);
}

#[tokio::test]
async fn should_list_split_and_unsplit_keys() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("VLAN_MEMBER", "Vlan100|Ethernet0", &fields(&[("tagging_mode", "untagged")]))
        .await
        .unwrap();
    db.set_entry("VLAN_MEMBER", "Vlan100|Ethernet4", &fields(&[("tagging_mode", "tagged")]))
        .await
        .unwrap();

    // when
    let mut split = db.get_keys("VLAN_MEMBER", true).await.unwrap();
    let mut unsplit = db.get_keys("VLAN_MEMBER", false).await.unwrap();
    split.sort();
    unsplit.sort();

    // then
    assert_eq!(split, vec!["Vlan100|Ethernet0", "Vlan100|Ethernet4"]);
    assert_eq!(
        unsplit,
        vec!["VLAN_MEMBER|Vlan100|Ethernet0", "VLAN_MEMBER|Vlan100|Ethernet4"]
    );
}

#[tokio::test]
async fn should_delete_table_larger_than_one_scan_batch() {
    // given
    let (db, _instance) = setup_config_db().await;
    for i in 0..100 {
        db.set_entry("PORT", &format!("Ethernet{}", i * 4), &fields(&[("mtu", "9100")]))
            .await
            .unwrap();
    }
    db.set_entry("PORTCHANNEL", "PortChannel0001", &fields(&[("mtu", "9100")]))
        .await
        .unwrap();

    // when
    db.delete_table("PORT").await.unwrap();

    // then
    assert!(db.get_keys("PORT", true).await.unwrap().is_empty());
    assert_eq!(
        db.get_keys("PORTCHANNEL", true).await.unwrap(),
        vec!["PortChannel0001"]
    );
}

#[tokio::test]
async fn should_treat_second_table_delete_as_no_op() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("VLAN", "Vlan10", &fields(&[("vlanid", "10")]))
        .await
        .unwrap();
    db.delete_table("VLAN").await.unwrap();

    // when
    let result = db.delete_table("VLAN").await;

    // then
    assert!(result.is_ok());
    assert!(db.get_table("VLAN").await.unwrap().is_empty());
}

#[tokio::test]
async fn should_distinguish_table_deletion_from_entry_deletion() {
    // given
    let (db, _instance) = setup_config_db().await;
    for table in ["ACL_TABLE", "ACL_RULE"] {
        db.set_entry(table, "k", &fields(&[("a", "1")])).await.unwrap();
        db.set_entry(table, "other", &fields(&[("a", "2")])).await.unwrap();
    }
    let mut change = ConfigData::new();
    change.insert("ACL_TABLE".to_string(), TableData::new());
    change.insert(
        "ACL_RULE".to_string(),
        [("k".to_string(), FieldValues::new())].into(),
    );

    // when
    db.mod_config(&change).await.unwrap();

    // then
    assert!(db.get_table("ACL_TABLE").await.unwrap().is_empty());
    let rules = db.get_table("ACL_RULE").await.unwrap();
    assert_eq!(rules.keys().collect::<Vec<_>>(), vec!["other"]);
}

#[tokio::test]
async fn should_drop_only_missing_field_when_replacing_port() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("PORT", "Ethernet0", &fields(&[("alias", "etp1"), ("mtu", "9100")]))
        .await
        .unwrap();

    // when
    db.set_entry("PORT", "Ethernet0", &fields(&[("alias", "etp1")]))
        .await
        .unwrap();

    // then
    let config = db.get_config().await.unwrap();
    assert_eq!(config["PORT"]["Ethernet0"], fields(&[("alias", "etp1")]));
}

#[tokio::test]
async fn should_merge_config_and_leave_other_tables() {
    // given
    let (db, _instance) = setup_config_db().await;
    db.set_entry("PORT", "Ethernet0", &fields(&[("alias", "etp1"), ("mtu", "9100")]))
        .await
        .unwrap();
    db.set_entry("DEVICE_METADATA", "localhost", &fields(&[("hostname", "sonic")]))
        .await
        .unwrap();
    let mut change = ConfigData::new();
    change.insert(
        "PORT".to_string(),
        [
            ("Ethernet0".to_string(), fields(&[("mtu", "1500")])),
            ("Ethernet4".to_string(), fields(&[("alias", "etp2")])),
        ]
        .into(),
    );

    // when
    db.mod_config(&change).await.unwrap();

    // then
    let config = db.get_config().await.unwrap();
    assert_eq!(
        config["PORT"]["Ethernet0"],
        fields(&[("alias", "etp1"), ("mtu", "1500")])
    );
    assert_eq!(config["PORT"]["Ethernet4"], fields(&[("alias", "etp2")]));
    assert_eq!(
        config["DEVICE_METADATA"]["localhost"],
        fields(&[("hostname", "sonic")])
    );
}

#[tokio::test]
async fn should_read_empty_config_when_only_marker_set() {
    // given
    let (db, instance) = setup_config_db().await;
    let store = instance.database(4).unwrap();
    store.set(INIT_INDICATOR, "1").await.unwrap();

    // when
    let config = db.get_config().await.unwrap();

    // then
    assert!(config.is_empty());
}

#[tokio::test]
async fn should_read_config_spanning_many_scan_batches() {
    // given
    let (db, _instance) = setup_config_db().await;
    let mut expected = ConfigData::new();
    for i in 0..75 {
        let table = format!("TABLE_{}", i % 3);
        let key = format!("key{}", i);
        let index = i.to_string();
        let data = fields(&[("index", index.as_str())]);
        db.set_entry(&table, &key, &data).await.unwrap();
        expected.entry(table).or_default().insert(key, data);
    }

    // when
    let config = db.get_config().await.unwrap();

    // then
    assert_eq!(config, expected);
}

#[tokio::test]
async fn should_skip_keys_without_separator() {
    // given
    let (db, instance) = setup_config_db().await;
    let store = instance.database(4).unwrap();
    store
        .hmset("NOT_A_TABLE", &fields(&[("a", "b")]))
        .await
        .unwrap();
    db.set_entry("PORT", "Ethernet0", &fields(&[("mtu", "9100")]))
        .await
        .unwrap();

    // when
    let config = db.get_config().await.unwrap();

    // then
    assert_eq!(config.keys().collect::<Vec<_>>(), vec!["PORT"]);
}

#[tokio::test]
async fn should_keep_databases_separate() {
    // given
    init_tracing();
    let instance = InMemoryInstance::new();
    let databases = DatabaseConfig::from_json(DATABASE_CONFIG).unwrap();
    let config_db = ConfigDb::connect(&instance, &databases, false, false)
        .await
        .unwrap();
    let appl_db = ConfigDb::open(
        &instance,
        &databases,
        Config {
            db_name: "APPL_DB".to_string(),
            ..Config::default()
        },
    )
    .await
    .unwrap();

    // when
    appl_db
        .set_entry("PORT_TABLE", "Ethernet0", &fields(&[("oper_status", "up")]))
        .await
        .unwrap();

    // then
    assert!(config_db.get_config().await.unwrap().is_empty());
    assert_eq!(
        appl_db.get_keys("PORT_TABLE", false).await.unwrap(),
        vec!["PORT_TABLE:Ethernet0"]
    );
}

#[tokio::test]
async fn should_block_connect_until_initialized() {
    // given
    init_tracing();
    let instance = Arc::new(InMemoryInstance::new());
    let databases = DatabaseConfig::from_json(DATABASE_CONFIG).unwrap();
    let store = instance.database(4).unwrap();
    let connecting = tokio::spawn({
        let instance = Arc::clone(&instance);
        async move {
            ConfigDb::connect(instance.as_ref(), &databases, true, false).await
        }
    });

    // when
    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .hmset("PORT|Ethernet0", &fields(&[("mtu", "9100")]))
        .await
        .unwrap();
    let before_marker = connecting.is_finished();
    store.set(INIT_INDICATOR, "1").await.unwrap();
    let db = tokio::time::timeout(Duration::from_secs(5), connecting)
        .await
        .expect("connect did not observe the marker")
        .unwrap()
        .unwrap();

    // then
    assert!(!before_marker);
    assert_eq!(db.get_table("PORT").await.unwrap().len(), 1);
}

#[tokio::test]
async fn should_not_block_when_already_initialized() {
    // given
    init_tracing();
    let instance = InMemoryInstance::without_keyspace_events();
    instance
        .database(4)
        .unwrap()
        .set(INIT_INDICATOR, "1")
        .await
        .unwrap();
    let databases = DatabaseConfig::from_json(DATABASE_CONFIG).unwrap();

    // when
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        ConfigDb::connect(&instance, &databases, true, false),
    )
    .await;

    // then
    assert!(matches!(result, Ok(Ok(_))));
}
