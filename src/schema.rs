diesel::table! {
    loads (id) {
        id -> Int8,
        customer_id -> Nullable<Text>,
        taxonomy_id -> Nullable<Text>,
        taxonomy_type -> Text,
        load_type -> Nullable<Text>,
        status -> Text,
        row_count -> Nullable<Int4>,
        details -> Jsonb,
        started_at -> Timestamptz,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    load_rows (id) {
        id -> Int8,
        load_id -> Int8,
        customer_id -> Text,
        taxonomy_id -> Text,
        record -> Jsonb,
        status -> Text,
        active -> Bool,
    }
}

diesel::table! {
    taxonomies (id) {
        id -> Int8,
        customer_id -> Text,
        taxonomy_id -> Text,
        name -> Nullable<Text>,
        taxonomy_type -> Text,
        status -> Text,
        last_load_id -> Nullable<Int8>,
    }
}

diesel::table! {
    node_types (id) {
        id -> Int8,
        name -> Text,
        name_lower -> Text,
        load_id -> Nullable<Int8>,
    }
}

diesel::table! {
    attribute_types (id) {
        id -> Int8,
        name -> Text,
        name_lower -> Text,
        load_id -> Nullable<Int8>,
    }
}

diesel::table! {
    nodes (id) {
        id -> Int8,
        node_type_id -> Int8,
        taxonomy_id -> Text,
        customer_id -> Text,
        parent_id -> Nullable<Int8>,
        value -> Text,
        value_lower -> Text,
        profession -> Nullable<Text>,
        level -> Int4,
        status -> Text,
        load_id -> Int8,
        row_id -> Nullable<Int8>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    node_attributes (id) {
        id -> Int8,
        node_id -> Int8,
        attribute_type_id -> Int8,
        value -> Text,
        value_lower -> Text,
        status -> Text,
        load_id -> Int8,
        row_id -> Nullable<Int8>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    taxonomy_versions (id) {
        id -> Int8,
        customer_id -> Text,
        taxonomy_id -> Text,
        version_number -> Int4,
        change_type -> Text,
        affected_nodes -> Jsonb,
        affected_attributes -> Jsonb,
        remapping -> Bool,
        nodes_processed -> Int4,
        nodes_new -> Int4,
        nodes_changed -> Int4,
        nodes_unchanged -> Int4,
        nodes_failed -> Int4,
        process_status -> Nullable<Text>,
        from_ts -> Timestamptz,
        to_ts -> Nullable<Timestamptz>,
        load_id -> Int8,
    }
}

diesel::table! {
    mapping_rules (id) {
        id -> Int8,
        name -> Text,
        enabled -> Bool,
        command -> Text,
        pattern -> Nullable<Text>,
        ai -> Bool,
        human -> Bool,
    }
}

diesel::table! {
    rule_assignments (id) {
        id -> Int8,
        rule_id -> Int8,
        master_node_type_id -> Int8,
        child_node_type_id -> Int8,
        priority -> Int4,
        enabled -> Bool,
    }
}

diesel::table! {
    mappings (id) {
        id -> Int8,
        rule_id -> Int8,
        master_node_id -> Int8,
        child_node_id -> Int8,
        confidence -> Int4,
        status -> Text,
        created_by -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    mapping_versions (id) {
        id -> Int8,
        mapping_id -> Int8,
        version_number -> Int4,
        from_ts -> Timestamptz,
        to_ts -> Nullable<Timestamptz>,
        superseded_by -> Nullable<Int8>,
        superseded_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    gold_mappings (mapping_id) {
        mapping_id -> Int8,
        master_node_id -> Int8,
        child_node_id -> Int8,
        projected_at -> Timestamptz,
    }
}

// Session-scoped staging tables created by the reconciliation engine with
// ON COMMIT DROP. They only exist inside a load transaction.
diesel::table! {
    loaded_nodes (taxonomy_id, customer_id, node_type_id, value_lower) {
        taxonomy_id -> Text,
        customer_id -> Text,
        node_type_id -> Int8,
        value_lower -> Text,
    }
}

diesel::table! {
    loaded_attributes (node_id, attribute_type_id, value_lower) {
        node_id -> Int8,
        attribute_type_id -> Int8,
        value_lower -> Text,
    }
}

diesel::joinable!(load_rows -> loads (load_id));
diesel::joinable!(nodes -> node_types (node_type_id));
diesel::joinable!(node_attributes -> nodes (node_id));
diesel::joinable!(node_attributes -> attribute_types (attribute_type_id));
diesel::joinable!(rule_assignments -> mapping_rules (rule_id));
diesel::joinable!(mappings -> mapping_rules (rule_id));
diesel::joinable!(mapping_versions -> mappings (mapping_id));
diesel::joinable!(gold_mappings -> mappings (mapping_id));

diesel::allow_tables_to_appear_in_same_query!(
    loads,
    load_rows,
    taxonomies,
    node_types,
    attribute_types,
    nodes,
    node_attributes,
    taxonomy_versions,
    mapping_rules,
    rule_assignments,
    mappings,
    mapping_versions,
    gold_mappings,
    loaded_nodes,
    loaded_attributes,
);
