diesel::table! {
    documents (collection, id) {
        collection -> Varchar,
        id -> Varchar,
        data -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
