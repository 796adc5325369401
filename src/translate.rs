use diesel::*;
use serde::Serialize;

use crate::errors::{Error, LookupError};
use crate::models::{EntityStatus, Node};

#[derive(Debug, Clone, Serialize)]
pub struct NodeRef {
    pub node_id: i64,
    pub value: String,
    pub level: i32,
}

impl From<Node> for NodeRef {
    fn from(node: Node) -> NodeRef {
        NodeRef { node_id: node.id, value: node.value, level: node.level }
    }
}

/// The answer to "given this code in taxonomy A, what is the equivalent
/// elsewhere": the resolved source node, its Master node through the Gold
/// projection, and, when a target taxonomy is named, the target nodes that
/// map to the same Master node.
#[derive(Debug, Clone, Serialize)]
pub struct Translation {
    pub source: NodeRef,
    pub master: Option<NodeRef>,
    pub equivalents: Vec<NodeRef>,
}

pub fn translate(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    code: &str,
    target: Option<(&str, &str)>,
) -> Result<Translation, Error> {
    let source = find_node(conn, customer, taxonomy, code)?
        .ok_or_else(|| LookupError::Node(customer.to_string(), taxonomy.to_string(), code.to_string()))?;

    let master = master_of(conn, source.id)?;

    let equivalents = match (&master, target) {
        (Some(master_node), Some((target_customer, target_taxonomy))) => {
            equivalents_of(conn, master_node.id, target_customer, target_taxonomy)?
        }
        _ => Vec::new(),
    };

    Ok(Translation {
        source: source.into(),
        master: master.map(NodeRef::from),
        equivalents: equivalents.into_iter().map(NodeRef::from).collect(),
    })
}

fn find_node(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    code: &str,
) -> Result<Option<Node>, Error> {
    use crate::schema::nodes::dsl::*;

    let found = nodes
        .filter(customer_id.eq(customer))
        .filter(taxonomy_id.eq(taxonomy))
        .filter(value_lower.eq(code.to_lowercase()))
        .filter(status.eq(EntityStatus::Active))
        .order(id.asc())
        .select(Node::as_select())
        .first::<Node>(conn)
        .optional()?;

    Ok(found)
}

fn master_of(conn: &mut PgConnection, child: i64) -> Result<Option<Node>, Error> {
    let master_id: Option<i64> = {
        use crate::schema::gold_mappings::dsl::*;

        gold_mappings
            .filter(child_node_id.eq(child))
            .select(master_node_id)
            .first::<i64>(conn)
            .optional()?
    };

    let Some(master_id) = master_id else {
        return Ok(None);
    };

    use crate::schema::nodes::dsl::*;

    let master = nodes
        .filter(id.eq(master_id))
        .select(Node::as_select())
        .first::<Node>(conn)
        .optional()?;

    Ok(master)
}

fn equivalents_of(
    conn: &mut PgConnection,
    master: i64,
    target_customer: &str,
    target_taxonomy: &str,
) -> Result<Vec<Node>, Error> {
    let children: Vec<i64> = {
        use crate::schema::gold_mappings::dsl::*;

        gold_mappings
            .filter(master_node_id.eq(master))
            .select(child_node_id)
            .load(conn)?
    };

    use crate::schema::nodes::dsl::*;

    let equivalents = nodes
        .filter(id.eq_any(children))
        .filter(customer_id.eq(target_customer))
        .filter(taxonomy_id.eq(target_taxonomy))
        .filter(status.eq(EntityStatus::Active))
        .order(id.asc())
        .select(Node::as_select())
        .load(conn)?;

    Ok(equivalents)
}
