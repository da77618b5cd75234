// End-to-end scenarios: literal inputs through the full pipeline, asserted
// against the serialized artifacts.

mod common;

use codegraph::config::IndexerConfig;
use common::{has_edge, Fixture};

#[test]
fn sql_only_create_table() {
    let fixture = Fixture::new();
    fixture.write(
        "db/001_CreateCustomer.sql",
        "CREATE TABLE dbo.Customer (Id INT NOT NULL PRIMARY KEY, Name NVARCHAR(100) NOT NULL);\n",
    );
    fixture.run(IndexerConfig::default());

    let keys = fixture.node_keys();
    assert!(keys.contains(&"dbo.Customer|TABLE".to_string()));
    assert!(!keys.iter().any(|k| k.ends_with("|ENTITY")));
    assert!(!keys.iter().any(|k| k.ends_with("|MIGRATION")));
    assert!(fixture.edges().is_empty());
}

#[test]
fn foreign_key_in_create_table() {
    let fixture = Fixture::new();
    fixture.write(
        "db/001_Parent.sql",
        "CREATE TABLE dbo.Parent (Id INT NOT NULL PRIMARY KEY);\n",
    );
    fixture.write(
        "db/002_Child.sql",
        "CREATE TABLE dbo.Child (Id INT NOT NULL PRIMARY KEY, ParentId INT NOT NULL, \
         CONSTRAINT FK_Child_Parent FOREIGN KEY (ParentId) REFERENCES dbo.Parent(Id));\n",
    );
    fixture.run(IndexerConfig::default());

    let keys = fixture.node_keys();
    assert!(keys.contains(&"dbo.Parent|TABLE".to_string()));
    assert!(keys.contains(&"dbo.Child|TABLE".to_string()));
    assert!(has_edge(
        &fixture.edges(),
        "dbo.Child|TABLE",
        "dbo.Parent|TABLE",
        "ForeignKey"
    ));
}

#[test]
fn ef_only_poco_entity() {
    let fixture = Fixture::new();
    fixture.write(
        "src/Customer.cs",
        r#"
namespace MiniEf
{
    public class Customer : BaseEntity
    {
        public int Id { get; set; }
        public string Name { get; set; }
    }
}
"#,
    );
    let config = IndexerConfig {
        entity_base_types: vec!["MiniEf.BaseEntity".to_string()],
        ..Default::default()
    };
    fixture.run(config);

    let keys = fixture.node_keys();
    assert!(keys.contains(&"csharp:Customer|ENTITY".to_string()));
    assert!(!keys.iter().any(|k| k.ends_with("|MIGRATION")));
    assert!(fixture
        .out()
        .join("docs/bodies/Poco.MiniEf.Customer.ENTITY.cs")
        .exists());
}

#[test]
fn migrations_only_with_touch_table() {
    let fixture = Fixture::new();
    fixture.write(
        "src/AddCustomerTouchMigration.cs",
        r#"
namespace MiniEf.Migrations
{
    public class AddCustomerTouchMigration
    {
        public void Up()
        {
            Schema.Table(nameof(Customer));
        }
    }
}
"#,
    );
    fixture.run(IndexerConfig::default());

    let keys = fixture.node_keys();
    assert!(keys
        .contains(&"csharp:MiniEf.Migrations.AddCustomerTouchMigration|MIGRATION".to_string()));
    // The touched table exists only through backfill.
    assert!(keys.contains(&"dbo.Customer|TABLE".to_string()));
    assert!(has_edge(
        &fixture.edges(),
        "csharp:MiniEf.Migrations.AddCustomerTouchMigration|MIGRATION",
        "dbo.Customer|TABLE",
        "SchemaChange"
    ));
}

#[test]
fn migration_add_foreign_key() {
    let fixture = Fixture::new();
    fixture.write(
        "src/LinkOrdersMigration.cs",
        r#"
namespace MiniEf.Migrations
{
    public class LinkOrdersMigration
    {
        public void Up()
        {
            migrationBuilder.AddForeignKey(
                name: "FK_Orders_Customer",
                table: "Orders",
                principalTable: "Customer",
                principalColumn: "Id");
        }
    }
}
"#,
    );
    fixture.run(IndexerConfig::default());

    assert!(has_edge(
        &fixture.edges(),
        "dbo.Orders|TABLE",
        "dbo.Customer|TABLE",
        "ForeignKey"
    ));
}

#[test]
fn inline_sql_select() {
    let fixture = Fixture::new();
    fixture.write(
        "src/RawSql.cs",
        r#"
namespace InlineSqlSample
{
    public class RawSql
    {
        public void LoadCustomers(IDbConnection conn)
        {
            var rows = conn.Query("SELECT c.Id, c.Name FROM dbo.Customer c WHERE c.IsActive = 1;");
        }
    }
}
"#,
    );
    fixture.run(IndexerConfig::default());

    let keys = fixture.node_keys();
    assert!(keys.contains(&"csharp:InlineSqlSample.RawSql.LoadCustomers|METHOD".to_string()));
    // No TABLE definition anywhere, so the tentative kind survives.
    assert!(has_edge(
        &fixture.edges(),
        "csharp:InlineSqlSample.RawSql.LoadCustomers|METHOD",
        "dbo.Customer|TABLE_OR_VIEW",
        "ReadsFrom"
    ));
}

#[test]
fn inline_sql_read_resolves_to_defined_table() {
    let fixture = Fixture::new();
    fixture.write(
        "db/Customer.sql",
        "CREATE TABLE dbo.Customer (Id INT NOT NULL PRIMARY KEY);\n",
    );
    fixture.write(
        "src/RawSql.cs",
        r#"
namespace InlineSqlSample
{
    public class RawSql
    {
        public void LoadCustomers(IDbConnection conn)
        {
            var rows = conn.Query("SELECT c.Id FROM dbo.Customer c;");
        }
    }
}
"#,
    );
    fixture.run(IndexerConfig::default());

    // Kind resolution rewrote the placeholder against the SQL definition.
    assert!(has_edge(
        &fixture.edges(),
        "csharp:InlineSqlSample.RawSql.LoadCustomers|METHOD",
        "dbo.Customer|TABLE",
        "ReadsFrom"
    ));
}

#[test]
fn deployment_script_batches_become_deploy_nodes() {
    let fixture = Fixture::new();
    fixture.write(
        "db/PostDeployment.sql",
        ":r .\\Seed\\SeedCustomers.sql\nINSERT INTO dbo.Settings (K, V) VALUES ('env', '$(Environment)');\nGO\n",
    );
    fixture.run(IndexerConfig::default());

    let keys = fixture.node_keys();
    assert!(keys.contains(&"PostDeployment.sql#batch0|DEPLOY".to_string()));
    assert!(has_edge(
        &fixture.edges(),
        "PostDeployment.sql#batch0|DEPLOY",
        "dbo.Settings|TABLE",
        "WritesTo"
    ));
}
