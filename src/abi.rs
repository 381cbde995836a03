use ethers::contract::abigen;

abigen!(
    IERC20,
    r#"[
        event Transfer(address indexed from, address indexed to, uint256 value)
    ]"#,
    event_derives(serde::Deserialize, serde::Serialize)
);
