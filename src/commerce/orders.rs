use rusqlite::Connection;

use super::{CommerceError, CommerceResult};
use crate::db::queries::{self, OrderTransitionFields};
use crate::error::{AppError, ErrorCode, msg};
use crate::models::{Order, OrderStatus};

pub fn find(conn: &Connection, org_id: i64, order_no: &str) -> CommerceResult<Order> {
    queries::get_order(conn, org_id, order_no.trim())?
        .ok_or_else(|| CommerceError::rejected(ErrorCode::OrderNotFound, msg::ORDER_NOT_FOUND))
}

/// Move `order` to `to`.
///
/// Moving to the current status is a no-op. The write is a compare-and-swap
/// on the status the caller read; if another writer got there first the
/// transition still succeeds when the row already holds `to`, otherwise it
/// fails with `ORDER_STATUS_CHANGED`.
pub fn transition(
    conn: &Connection,
    order: &Order,
    to: OrderStatus,
    fields: &OrderTransitionFields,
) -> CommerceResult<Order> {
    if order.status == to {
        return Ok(order.clone());
    }
    if !order.status.can_transition_to(to) {
        return Err(CommerceError::rejected(
            ErrorCode::OrderStatusInvalid,
            msg::ORDER_STATUS_INVALID,
        ));
    }

    let swapped = queries::cas_order_status(conn, &order.id, order.status, to, fields)?;
    let current = queries::get_order(conn, order.org_id, &order.order_no)?
        .ok_or_else(|| AppError::Internal(format!("order {} vanished", order.order_no)))?;

    if swapped || current.status == to {
        tracing::debug!(
            order_no = %order.order_no,
            from = order.status.as_ref(),
            to = to.as_ref(),
            "Order transitioned"
        );
        return Ok(current);
    }

    tracing::warn!(
        order_no = %order.order_no,
        expected = order.status.as_ref(),
        found = current.status.as_ref(),
        "Order status changed underneath transition"
    );
    Err(CommerceError::rejected(
        ErrorCode::OrderStatusChanged,
        msg::ORDER_STATUS_CHANGED,
    ))
}
