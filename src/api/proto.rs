//! Protobuf frames of the private order stream.
//!
//! Only the fields the bot reads are declared; prost skips unknown tags.

use crate::models::{OrderUpdate, StreamOrderStatus};

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushDataV3ApiWrapper {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(string, optional, tag = "3")]
    pub symbol: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub symbol_id: Option<String>,
    #[prost(int64, optional, tag = "5")]
    pub create_time: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub send_time: Option<i64>,
    #[prost(message, optional, tag = "304")]
    pub private_orders: Option<PrivateOrdersV3Api>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PrivateOrdersV3Api {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub client_id: String,
    #[prost(string, tag = "3")]
    pub price: String,
    #[prost(string, tag = "4")]
    pub quantity: String,
    #[prost(string, tag = "5")]
    pub amount: String,
    #[prost(string, tag = "6")]
    pub avg_price: String,
    #[prost(int32, tag = "7")]
    pub order_type: i32,
    #[prost(int32, tag = "8")]
    pub trade_type: i32,
    #[prost(bool, tag = "9")]
    pub is_maker: bool,
    #[prost(string, tag = "10")]
    pub remain_amount: String,
    #[prost(string, tag = "11")]
    pub remain_quantity: String,
    #[prost(string, optional, tag = "12")]
    pub last_deal_quantity: Option<String>,
    #[prost(string, tag = "13")]
    pub cumulative_quantity: String,
    #[prost(string, tag = "14")]
    pub cumulative_amount: String,
    #[prost(int32, tag = "15")]
    pub status: i32,
    #[prost(int64, tag = "16")]
    pub create_time: i64,
}

/// Decode one binary frame. Frames without an order body yield `None`.
pub fn decode_order_update(bytes: &[u8]) -> Result<Option<OrderUpdate>, prost::DecodeError> {
    let wrapper = <PushDataV3ApiWrapper as prost::Message>::decode(bytes)?;

    Ok(wrapper.private_orders.map(|order| OrderUpdate {
        order_id: order.id,
        price: order.price,
        quantity: order.cumulative_quantity,
        status: StreamOrderStatus::from(order.status),
        created_at: order.create_time,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn encode_fill(id: &str, price: &str, qty: &str, status: i32) -> Vec<u8> {
        PushDataV3ApiWrapper {
            channel: "spot@private.orders.v3.api.pb".to_string(),
            symbol: Some("KASUSDT".to_string()),
            private_orders: Some(PrivateOrdersV3Api {
                id: id.to_string(),
                price: price.to_string(),
                quantity: "40".to_string(),
                cumulative_quantity: qty.to_string(),
                status,
                create_time: 1_718_000_000_000,
                ..Default::default()
            }),
            ..Default::default()
        }
        .encode_to_vec()
    }

    #[test]
    fn test_decodes_private_order() {
        let bytes = encode_fill("C02__1", "0.0812", "40", 2);

        let update = decode_order_update(&bytes).unwrap().unwrap();
        assert_eq!(update.order_id, "C02__1");
        assert_eq!(update.price, "0.0812");
        assert_eq!(update.quantity, "40");
        assert_eq!(update.status, StreamOrderStatus::FullyTraded);
        assert_eq!(update.created_at, 1_718_000_000_000);
    }

    #[test]
    fn test_frame_without_order_body() {
        let bytes = PushDataV3ApiWrapper {
            channel: "spot@public.deals.v3.api.pb".to_string(),
            ..Default::default()
        }
        .encode_to_vec();

        assert_eq!(decode_order_update(&bytes).unwrap(), None);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(decode_order_update(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
