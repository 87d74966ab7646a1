use serde_json::{json, Value};

use crate::projects::models::Project;

/// TZIP-21-style metadata document for the project token. Its URL is
/// the metadata URI attached to the first minted entry, so every
/// fractional holder shares one token definition.
pub fn token_metadata(project: &Project, minter_wallet: &str) -> Value {
    let mut metadata = json!({
        "name": project.title,
        "description": project.description,
        "date": project.created_on.to_rfc3339(),
        "decimals": 0,
        "creators": [project.artist_wallet],
        "minter": minter_wallet,
        "rights": "No License / All Rights Reserved",
    });

    if project.royalty_pct > 0 {
        // royalty shares use 3 decimals: whole percent -> permille * 10
        let mut shares = serde_json::Map::new();
        shares.insert(
            project.artist_wallet.clone(),
            json!(i64::from(project.royalty_pct) * 10),
        );
        metadata["royalties"] = json!({ "decimals": 3, "shares": shares });
    }

    metadata
}
