//! ABI definitions consumed by the agent (§6).
//!
//! The swap event shape is the standard concentrated-liquidity log; the
//! router call is this project's own Reflex router method.

use ethabi::{Event, EventParam, ParamType};
use ethers::types::{Address, H256};
use ethers::utils::keccak256;

/// `event Swap(address indexed sender, address indexed recipient, int256 amount0,
/// int256 amount1, uint160 sqrtPriceX96, uint128 liquidity, int24 tick)`
pub fn swap_event() -> Event {
    Event {
        name: "Swap".to_string(),
        inputs: vec![
            EventParam {
                name: "sender".to_string(),
                kind: ParamType::Address,
                indexed: true,
            },
            EventParam {
                name: "recipient".to_string(),
                kind: ParamType::Address,
                indexed: true,
            },
            EventParam {
                name: "amount0".to_string(),
                kind: ParamType::Int(256),
                indexed: false,
            },
            EventParam {
                name: "amount1".to_string(),
                kind: ParamType::Int(256),
                indexed: false,
            },
            EventParam {
                name: "sqrtPriceX96".to_string(),
                kind: ParamType::Uint(160),
                indexed: false,
            },
            EventParam {
                name: "liquidity".to_string(),
                kind: ParamType::Uint(128),
                indexed: false,
            },
            EventParam {
                name: "tick".to_string(),
                kind: ParamType::Int(24),
                indexed: false,
            },
        ],
        anonymous: false,
    }
}

/// Topic0 hash the dual event source filters its subscription/poll queries
/// on, and the decoder checks every log against.
pub fn swap_event_signature() -> H256 {
    swap_event().signature()
}

/// Derive the router's bytes32 pool id from a pool address.
///
/// MVP convention (flagged for production review in §9): keccak256 of the
/// lowercased hex address string, taken as UTF-8 bytes — not the left-padded
/// 20-byte address a canonical encoding would use. This must match whatever
/// convention the deployed router actually expects.
pub fn pool_id_bytes32(pool_address: Address) -> [u8; 32] {
    let lower_hex = format!("{:#x}", pool_address);
    keccak256(lower_hex.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_event_signature_is_stable() {
        // event Swap(address,address,int256,int256,uint160,uint128,int24)
        let sig = swap_event_signature();
        assert_eq!(sig.as_bytes().len(), 32);
    }

    #[test]
    fn test_pool_id_derivation_is_deterministic() {
        let addr = Address::from_low_u64_be(0xAAAA);
        let a = pool_id_bytes32(addr);
        let b = pool_id_bytes32(addr);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pool_id_derivation_is_case_insensitive_on_input() {
        // Address formatting always lowercases, so two equal addresses
        // constructed differently must still derive the same id.
        let a = Address::from_low_u64_be(0x1234);
        let b = Address::from_low_u64_be(0x1234);
        assert_eq!(pool_id_bytes32(a), pool_id_bytes32(b));
    }
}
