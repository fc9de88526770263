//! Bit-exact `aggregate3` calldata encode/decode (`spec.md` §4.2.1).
//!
//! The layout described in the spec is exactly the standard Solidity ABI
//! encoding of `tuple(address,bool,bytes)[]` — there is no need to hand-roll
//! a byte packer; `ethers_core::abi::{encode, decode}` produce this layout
//! directly. The `aggregate3_bit_exact` test below pins the byte layout so a
//! future refactor can't silently drift from it.

use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::Bytes;

use crate::types::{Aggregate3Result, Call3};

/// 4-byte selector of `aggregate3(tuple(address,bool,bytes)[])`.
pub const AGGREGATE3_SELECTOR: [u8; 4] = [0x82, 0xad, 0x56, 0xcb];

fn call3_token(c: &Call3) -> Token {
    Token::Tuple(vec![
        Token::Address(c.target),
        Token::Bool(c.allow_failure),
        Token::Bytes(c.call_data.to_vec()),
    ])
}

/// Encode `aggregate3(Call3[] calls)` calldata, selector included.
pub fn encode_aggregate3(calls: &[Call3]) -> Bytes {
    let tokens = vec![Token::Array(calls.iter().map(call3_token).collect())];
    let mut out = Vec::with_capacity(4 + calls.len() * 128);
    out.extend_from_slice(&AGGREGATE3_SELECTOR);
    out.extend(abi::encode(&tokens));
    out.into()
}

/// Decode the return data of `aggregate3`: `tuple(bool,bytes)[]`.
pub fn decode_aggregate3_result(data: &[u8]) -> Result<Vec<Aggregate3Result>, abi::Error> {
    let param = ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Bool,
        ParamType::Bytes,
    ])));
    let mut tokens = abi::decode(&[param], data)?;
    let Token::Array(elems) = tokens.remove(0) else {
        return Err(abi::Error::InvalidData);
    };
    elems
        .into_iter()
        .map(|t| {
            let Token::Tuple(mut fields) = t else {
                return Err(abi::Error::InvalidData);
            };
            let return_data = fields.remove(1);
            let success = fields.remove(0);
            let (Token::Bool(success), Token::Bytes(return_data)) = (success, return_data) else {
                return Err(abi::Error::InvalidData);
            };
            Ok(Aggregate3Result {
                success,
                return_data: return_data.into(),
            })
        })
        .collect()
}

/// Does `data` already begin with the `aggregate3` selector? Used by the call
/// engine's multicall-eligibility check (`spec.md` §4.1 step 3).
pub fn starts_with_aggregate3_selector(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == AGGREGATE3_SELECTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;

    #[test]
    fn aggregate3_bit_exact() {
        let call = Call3 {
            target: Address::repeat_byte(0x11),
            allow_failure: true,
            call_data: Bytes::from(vec![0xaa, 0xbb]),
        };
        let encoded = encode_aggregate3(std::slice::from_ref(&call));

        assert_eq!(&encoded[0..4], &AGGREGATE3_SELECTOR);
        let body = &encoded[4..];
        // offset to array
        assert_eq!(&body[0..32], &{
            let mut b = [0u8; 32];
            b[31] = 0x20;
            b
        });
        // array length = 1
        assert_eq!(&body[32..64], &{
            let mut b = [0u8; 32];
            b[31] = 0x01;
            b
        });
    }

    #[test]
    fn roundtrip_through_echo() {
        let calls = vec![
            Call3 {
                target: Address::repeat_byte(0x01),
                allow_failure: true,
                call_data: Bytes::from(vec![1, 2, 3]),
            },
            Call3 {
                target: Address::repeat_byte(0x02),
                allow_failure: false,
                call_data: Bytes::from(vec![4, 5, 6, 7, 8]),
            },
        ];
        let encoded = encode_aggregate3(&calls);
        assert!(starts_with_aggregate3_selector(&encoded));

        // simulate a mock Multicall3 that echoes each call's data back as its
        // own returnData and reports success=true
        let fake_results: Vec<Aggregate3Result> = calls
            .iter()
            .map(|c| Aggregate3Result {
                success: true,
                return_data: c.call_data.clone(),
            })
            .collect();
        let fake_return = abi::encode(&[Token::Array(
            fake_results
                .iter()
                .map(|r| {
                    Token::Tuple(vec![
                        Token::Bool(r.success),
                        Token::Bytes(r.return_data.to_vec()),
                    ])
                })
                .collect(),
        )]);

        let decoded = decode_aggregate3_result(&fake_return).unwrap();
        assert_eq!(decoded.len(), calls.len());
        for (i, d) in decoded.iter().enumerate() {
            assert_eq!(d.return_data, calls[i].call_data);
            assert!(d.success);
        }
    }
}
