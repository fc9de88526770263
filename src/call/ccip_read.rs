//! ERC-3668 CCIP-Read gateway round-trip (`spec.md` §4.1.1).

use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{Address, Bytes};
use url::Url;

use crate::error::{ActionError, ActionResult};

/// 4-byte selector of `OffchainLookup(address,string[],bytes,bytes4,bytes)`.
pub const OFFCHAIN_LOOKUP_SELECTOR: [u8; 4] = [0x55, 0x6f, 0x18, 0x30];

/// Decoded `OffchainLookup` revert payload.
#[derive(Debug, Clone)]
pub struct OffchainLookup {
    pub sender: Address,
    pub urls: Vec<String>,
    pub call_data: Bytes,
    pub callback_function: [u8; 4],
    pub extra_data: Bytes,
}

/// Attempt to decode `revert_data` as an `OffchainLookup` revert. Returns
/// `None` if the selector doesn't match.
pub fn decode_offchain_lookup(revert_data: &[u8]) -> Option<OffchainLookup> {
    if revert_data.len() < 4 || revert_data[..4] != OFFCHAIN_LOOKUP_SELECTOR {
        return None;
    }
    let params = [
        ParamType::Address,
        ParamType::Array(Box::new(ParamType::String)),
        ParamType::Bytes,
        ParamType::FixedBytes(4),
        ParamType::Bytes,
    ];
    let mut tokens = abi::decode(&params, &revert_data[4..]).ok()?;
    let extra_data = tokens.remove(4).into_bytes()?;
    let callback_bytes = tokens.remove(3).into_fixed_bytes()?;
    let call_data = tokens.remove(2).into_bytes()?;
    let urls_tokens = tokens.remove(1).into_array()?;
    let sender = tokens.remove(0).into_address()?;

    let urls = urls_tokens
        .into_iter()
        .filter_map(Token::into_string)
        .collect();
    let mut callback_function = [0u8; 4];
    callback_function.copy_from_slice(&callback_bytes[..4]);

    Some(OffchainLookup {
        sender,
        urls,
        call_data: call_data.into(),
        callback_function,
        extra_data: extra_data.into(),
    })
}

fn substitute(url_template: &str, sender: Address, data: &Bytes) -> String {
    let sender_hex = format!("{sender:?}");
    let data_hex = format!("{data}");
    url_template
        .replace("{sender}", &urlencoding_encode(&sender_hex))
        .replace("{data}", &urlencoding_encode(&data_hex))
}

fn urlencoding_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[derive(serde::Serialize)]
struct GatewayPostBody<'a> {
    data: &'a str,
    sender: String,
}

#[derive(serde::Deserialize)]
struct GatewayResponse {
    data: Option<String>,
    message: Option<String>,
}

/// Perform the gateway round trip: GET/POST each url in order until one
/// returns a 2xx response carrying a `data` hex field.
pub async fn fetch_from_gateways(
    http: &reqwest::Client,
    lookup: &OffchainLookup,
) -> ActionResult<Bytes> {
    if lookup.urls.is_empty() {
        return Err(ActionError::OffchainLookup(
            "no gateway urls provided".into(),
        ));
    }

    let data_hex = format!("{}", lookup.call_data);
    let mut last_err = None;

    for template in &lookup.urls {
        let has_data_placeholder = template.contains("{data}");
        let url_str = substitute(template, lookup.sender, &lookup.call_data);

        let resp = if has_data_placeholder {
            let url = match Url::parse(&url_str) {
                Ok(u) => u,
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            };
            http.get(url).send().await
        } else {
            let url = match Url::parse(&url_str) {
                Ok(u) => u,
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            };
            let body = GatewayPostBody {
                data: &data_hex,
                sender: format!("{:?}", lookup.sender),
            };
            http.post(url).json(&body).send().await
        };

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                last_err = Some(e.to_string());
                continue;
            }
        };

        if !resp.status().is_success() {
            last_err = Some(format!("gateway returned status {}", resp.status()));
            continue;
        }

        match resp.json::<GatewayResponse>().await {
            Ok(body) => {
                if let Some(data) = body.data {
                    let bytes = hex::decode(data.trim_start_matches("0x"))
                        .map_err(|e| ActionError::OffchainLookup(e.to_string()))?;
                    return Ok(Bytes::from(bytes));
                }
                last_err = body.message.or(Some("gateway response missing `data`".into()));
            }
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    Err(ActionError::OffchainLookup(
        last_err.unwrap_or_else(|| "all gateways failed".into()),
    ))
}

/// Build the callback calldata: `callbackFunction || abi.encode(response, extraData)`.
pub fn build_callback_calldata(lookup: &OffchainLookup, response: Bytes) -> Bytes {
    let args = abi::encode(&[
        Token::Bytes(response.to_vec()),
        Token::Bytes(lookup.extra_data.to_vec()),
    ]);
    let mut out = Vec::with_capacity(4 + args.len());
    out.extend_from_slice(&lookup.callback_function);
    out.extend(args);
    out.into()
}

/// Bound recursion so a misbehaving chain of gateways can't loop forever
/// (`spec.md` §4.1.1: "an implementation should bound recursion to at least
/// 4 hops").
pub const MAX_CCIP_READ_HOPS: u32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_offchain_lookup() {
        let sender = Address::repeat_byte(0x42);
        let tokens = vec![
            Token::Address(sender),
            Token::Array(vec![Token::String("https://example.com/{sender}/{data}".into())]),
            Token::Bytes(vec![1, 2, 3]),
            Token::FixedBytes(vec![0xaa, 0xbb, 0xcc, 0xdd]),
            Token::Bytes(vec![9, 9]),
        ];
        let mut data = OFFCHAIN_LOOKUP_SELECTOR.to_vec();
        data.extend(abi::encode(&tokens));

        let decoded = decode_offchain_lookup(&data).unwrap();
        assert_eq!(decoded.sender, sender);
        assert_eq!(decoded.urls, vec!["https://example.com/{sender}/{data}"]);
        assert_eq!(decoded.callback_function, [0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn non_matching_selector_returns_none() {
        assert!(decode_offchain_lookup(&[0, 0, 0, 0]).is_none());
    }

    #[test]
    fn substitution_url_encodes() {
        let sender = Address::repeat_byte(0x01);
        let data = Bytes::from(vec![0xde, 0xad]);
        let out = substitute("https://g.example/{sender}/{data}.json", sender, &data);
        assert!(out.contains("0x"));
        assert!(!out.contains('{'));
    }
}
