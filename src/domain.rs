use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GibError;

/// Number of attribute columns carried by a success row.
pub const ATTRIBUTE_COLUMNS: usize = 10;

static BASE58_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{1,64}$").expect("valid base58 regex")
});

/// A token mint address as it appears in the mint list.
///
/// Parsing only checks the base58 alphabet, which is enough to make the value
/// safe for file names. The 32-byte public key check happens in
/// [`MintId::to_bytes`], where the resolver needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MintId(String);

impl MintId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<[u8; 32], GibError> {
        let decoded = bs58::decode(&self.0)
            .into_vec()
            .map_err(|err| GibError::InvalidMint(format!("{}: {err}", self.0)))?;
        decoded.try_into().map_err(|bytes: Vec<u8>| {
            GibError::InvalidMint(format!("{}: expected 32 bytes, got {}", self.0, bytes.len()))
        })
    }
}

impl fmt::Display for MintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MintId {
    type Err = GibError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !BASE58_RE.is_match(trimmed) {
            return Err(GibError::InvalidMint(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Creator {
    pub address: String,
    pub verified: bool,
    pub share: u8,
}

/// Decoded token-metadata account for one mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnChainRecord {
    pub mint: String,
    pub update_authority: String,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub creators: Vec<Creator>,
    pub primary_sale_happened: bool,
    pub is_mutable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, deserialize_with = "lenient_string")]
    pub trait_type: String,
    #[serde(default)]
    pub value: Value,
}

/// The off-chain JSON document. Unknown fields are ignored and missing ones
/// stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffChainRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub external_url: String,
    #[serde(default, deserialize_with = "lenient_attributes")]
    pub attributes: Vec<Attribute>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        other => attribute_text(&other),
    })
}

fn lenient_attributes<'de, D>(deserializer: D) -> Result<Vec<Attribute>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}

/// Renders an opaque attribute value as a single cell.
pub fn attribute_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// One success row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub token_id: String,
    pub collection: String,
    pub metadata_url: String,
    pub image_url: String,
    pub name: String,
    pub attributes: [String; ATTRIBUTE_COLUMNS],
}

impl OutputRecord {
    pub const HEADER: &'static str = "TokenID,Collection,MetadataURL,ImageURL,Name,Attribute01,Attribute02,Attribute03,Attribute04,Attribute05,Attribute06,Attribute07,Attribute08,Attribute09,Attribute10";

    /// Extra attributes past the tenth are dropped; missing ones stay blank.
    pub fn new(token_id: &str, onchain: &OnChainRecord, offchain: &OffChainRecord) -> Self {
        let mut attributes: [String; ATTRIBUTE_COLUMNS] = Default::default();
        for (slot, attribute) in attributes.iter_mut().zip(&offchain.attributes) {
            *slot = attribute_text(&attribute.value);
        }
        Self {
            token_id: token_id.to_string(),
            collection: onchain.name.clone(),
            metadata_url: onchain.uri.clone(),
            image_url: offchain.image.clone(),
            name: offchain.name.clone(),
            attributes,
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        let mut fields = vec![
            self.token_id.as_str(),
            self.collection.as_str(),
            self.metadata_url.as_str(),
            self.image_url.as_str(),
            self.name.as_str(),
        ];
        fields.extend(self.attributes.iter().map(String::as_str));
        fields
    }
}

/// One failed attempt for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub token_id: String,
    pub reason: String,
    pub detail: Option<String>,
}

impl ErrorRecord {
    pub const HEADER: &'static str = "TokenID,Reason,Detail";

    pub fn fields(&self) -> Vec<&str> {
        let mut fields = vec![self.token_id.as_str(), self.reason.as_str()];
        if let Some(detail) = &self.detail {
            fields.push(detail.as_str());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn onchain(name: &str) -> OnChainRecord {
        OnChainRecord {
            mint: "AAA".to_string(),
            update_authority: "11111111111111111111111111111111".to_string(),
            name: name.to_string(),
            symbol: "SYM".to_string(),
            uri: "https://example.org/AAA.json".to_string(),
            seller_fee_basis_points: 500,
            creators: Vec::new(),
            primary_sale_happened: false,
            is_mutable: true,
        }
    }

    #[test]
    fn parse_mint_id_trims() {
        let id: MintId = "  AAA \n".parse().unwrap();
        assert_eq!(id.as_str(), "AAA");
    }

    #[test]
    fn parse_mint_id_rejects_non_base58() {
        let err = "0OIl".parse::<MintId>().unwrap_err();
        assert_matches!(err, GibError::InvalidMint(_));
        let err = "../etc".parse::<MintId>().unwrap_err();
        assert_matches!(err, GibError::InvalidMint(_));
    }

    #[test]
    fn short_mint_has_no_public_key() {
        let id: MintId = "AAA".parse().unwrap();
        assert_matches!(id.to_bytes(), Err(GibError::InvalidMint(_)));
    }

    #[test]
    fn system_program_decodes_to_zero_key() {
        let id: MintId = "11111111111111111111111111111111".parse().unwrap();
        assert_eq!(id.to_bytes().unwrap(), [0u8; 32]);
    }

    #[test]
    fn attribute_text_unwraps_strings() {
        assert_eq!(attribute_text(&json!("Red")), "Red");
        assert_eq!(attribute_text(&json!(7)), "7");
        assert_eq!(attribute_text(&json!(true)), "true");
        assert_eq!(attribute_text(&Value::Null), "");
        assert_eq!(attribute_text(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn offchain_record_tolerates_missing_and_null_fields() {
        let record: OffChainRecord = serde_json::from_value(json!({
            "name": "X",
            "image": null,
            "attributes": null,
            "properties": {"files": []}
        }))
        .unwrap();
        assert_eq!(record.name, "X");
        assert!(record.image.is_empty());
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn output_record_truncates_to_ten_attributes() {
        let attributes = (1..=12)
            .map(|n| Attribute {
                trait_type: format!("t{n}"),
                value: json!(format!("v{n}")),
            })
            .collect();
        let offchain = OffChainRecord {
            name: "X".to_string(),
            attributes,
            ..Default::default()
        };
        let record = OutputRecord::new("AAA", &onchain("Collection"), &offchain);
        assert_eq!(record.attributes[0], "v1");
        assert_eq!(record.attributes[9], "v10");
        assert_eq!(record.fields().len(), 15);
    }

    #[test]
    fn output_record_pads_short_attribute_lists() {
        let offchain = OffChainRecord {
            attributes: vec![
                Attribute {
                    trait_type: "Color".to_string(),
                    value: json!("Red"),
                },
                Attribute {
                    trait_type: "Level".to_string(),
                    value: json!(3),
                },
                Attribute {
                    trait_type: "Rare".to_string(),
                    value: json!(false),
                },
            ],
            ..Default::default()
        };
        let record = OutputRecord::new("AAA", &onchain("Collection"), &offchain);
        assert_eq!(&record.attributes[..3], &["Red", "3", "false"]);
        assert!(record.attributes[3..].iter().all(String::is_empty));
    }

    #[test]
    fn error_record_omits_missing_detail() {
        let record = ErrorRecord {
            token_id: "BBB".to_string(),
            reason: "failed to get metadata account".to_string(),
            detail: None,
        };
        assert_eq!(record.fields(), vec!["BBB", "failed to get metadata account"]);
    }
}
