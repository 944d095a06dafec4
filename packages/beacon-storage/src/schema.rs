pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_resource_registry.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_resource_registry.sql")),
				"tables/002_resource_vectors.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_resource_vectors.sql")),
				"tables/003_operation_status.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_operation_status.sql")),
				"tables/004_resource_tombstones.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_resource_tombstones.sql")),
				"tables/005_match_history.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_match_history.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
